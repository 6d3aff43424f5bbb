//! TestRunnerBuilder - Fluent API for configuring a TestRunner

use super::TestRunner;
use crate::config::{EnvOverrides, HarnessConfig};
use crate::debug::{
    DebugHook, DiagnosticChannel, InteractivePostMortem, LogDiagnostics, PostMortem,
};
use crate::orchestrator::Clock;
use crate::runtime::UnitRuntime;
use crate::timeout::{
    AlarmChannel, InterruptSource, ManualInterruptSource, PhaseGuard, TimeoutLimits,
    TimerInterruptSource,
};
use log::{debug, warn};
use std::sync::Arc;
use tos_supervisor_common::ConfigurationError;

/// Builder for TestRunner instances
///
/// # Example
///
/// ```rust,ignore
/// use tos_test_supervisor::prelude::*;
///
/// let config = HarnessConfig::load("supervisor.yaml")?.with_env_overrides()?;
/// let runner = TestRunnerBuilder::from_config(config)
///     .with_clock(clock)
///     .build()?;
/// ```
pub struct TestRunnerBuilder {
    /// Harness configuration
    config: HarnessConfig,

    /// Clock implementation, `SystemClock` when unset
    clock: Option<Arc<dyn Clock>>,

    /// Interrupt source driving the alarm, a timer on the clock when unset
    /// and a `ManualInterruptSource` when the clock is scripted
    interrupt_source: Option<Arc<dyn InterruptSource>>,

    /// Runtime whose units are supervised
    runtime: Option<UnitRuntime>,

    /// Inspector opened on qualifying faults
    post_mortem: Option<Arc<dyn PostMortem>>,

    /// Channel every fault is reported to
    diagnostics: Option<Arc<dyn DiagnosticChannel>>,

    /// Forced FLAKY feedback, derived from the configuration when unset
    flaky_feedback: Option<bool>,
}

impl TestRunnerBuilder {
    /// Builder over `config`
    pub fn from_config(config: HarnessConfig) -> Self {
        Self {
            config,
            clock: None,
            interrupt_source: None,
            runtime: None,
            post_mortem: None,
            diagnostics: None,
            flaky_feedback: None,
        }
    }

    /// Set clock implementation
    ///
    /// If not set, uses `SystemClock` by default.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the interrupt source of the alarm
    ///
    /// Tests pass a `ManualInterruptSource` to expire the alarm on demand.
    pub fn with_interrupt_source(mut self, source: Arc<dyn InterruptSource>) -> Self {
        self.interrupt_source = Some(source);
        self
    }

    /// Supervise the units of `runtime`
    ///
    /// If not set, the process-wide runtime is used with the default clock,
    /// or a new runtime when a clock was given.
    pub fn with_runtime(mut self, runtime: UnitRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Inspector used when post-mortem is enabled
    pub fn with_post_mortem(mut self, post_mortem: Arc<dyn PostMortem>) -> Self {
        self.post_mortem = Some(post_mortem);
        self
    }

    /// Channel faults are reported to, `LogDiagnostics` by default
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticChannel>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Force the FLAKY feedback on or off
    pub fn with_flaky_feedback(mut self, enabled: bool) -> Self {
        self.flaky_feedback = Some(enabled);
        self
    }

    /// Build the TestRunner
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if either timeout ceiling is missing or
    /// invalid. Nothing has run at that point.
    pub fn build(self) -> Result<TestRunner, ConfigurationError> {
        let ceilings = self.config.ceilings()?;
        // Validates the ceilings themselves before any test is collected
        TimeoutLimits::resolve(&ceilings, None)?;

        let runtime = match (self.runtime, &self.clock) {
            (Some(runtime), _) => runtime,
            (None, Some(clock)) => UnitRuntime::new(clock.clone()),
            (None, None) => UnitRuntime::global().clone(),
        };
        let clock = self.clock.unwrap_or_else(|| runtime.clock());
        let source = match self.interrupt_source {
            Some(source) => source,
            None if clock.is_scripted() => {
                debug!("Scripted clock without an interrupt source, alarms only fire on demand");
                Arc::new(ManualInterruptSource::new())
            }
            None => Arc::new(TimerInterruptSource::new(clock.clone())),
        };

        let debug_hook = if self.config.post_mortem {
            let diagnostics = self
                .diagnostics
                .unwrap_or_else(|| Arc::new(LogDiagnostics));
            let post_mortem = self
                .post_mortem
                .unwrap_or_else(|| Arc::new(InteractivePostMortem::stdio()));
            let hook = Arc::new(DebugHook::new(diagnostics, post_mortem, &runtime));
            if !hook.install(&runtime) {
                warn!(
                    "The unit runtime already has a fault sink, post-mortem only covers test phases"
                );
            }
            Some(hook)
        } else {
            None
        };

        let flaky_feedback = self
            .flaky_feedback
            .unwrap_or_else(|| self.config.verbosity > 0 && !EnvOverrides::get().is_worker());
        debug!(
            "Runner built: post-mortem {}, flaky feedback {}",
            debug_hook.is_some(),
            flaky_feedback
        );

        Ok(TestRunner {
            guard: PhaseGuard::new(AlarmChannel::new(source, &runtime), clock.clone()),
            config: self.config,
            ceilings,
            clock,
            runtime,
            debug_hook,
            flaky_feedback,
        })
    }
}
