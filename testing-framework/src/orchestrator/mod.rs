// File: testing-framework/src/orchestrator/mod.rs
//
// Orchestrator Module
//
// Time control for the supervisor and ready made environments wiring a clock,
// an interrupt source and a unit runtime together.

/// Clock abstractions for deterministic time control in tests
pub mod clock;

pub use clock::{Clock, ManualClock, PausedClock, SystemClock};

use crate::config::HarnessConfig;
use crate::runner::TestRunnerBuilder;
use crate::runtime::UnitRuntime;
use crate::timeout::{
    AlarmChannel, InterruptSource, ManualInterruptSource, PhaseGuard, TimerInterruptSource,
};
use std::sync::Arc;

/// Clock, interrupt source and runtime sharing the same notion of time
///
/// # Usage Patterns
///
/// ## Exact budget arithmetic
///
/// ```rust
/// use chrono::TimeDelta;
/// use tokio::time::Duration;
/// use tos_test_supervisor::orchestrator::{Clock, SupervisionEnv};
/// use tos_test_supervisor::timeout::{BudgetStore, Phase, TimeoutLimits};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let env = SupervisionEnv::manual();
///     let guard = env.guard();
///     let mut store = BudgetStore::new(TimeoutLimits {
///         shared: TimeDelta::seconds(10),
///         teardown: TimeDelta::seconds(5),
///     });
///
///     guard
///         .run_shared(&mut store, Phase::Setup, async {
///             env.clock.sleep(Duration::from_secs(6)).await;
///             anyhow::Ok(())
///         })
///         .await
///         .unwrap();
///     assert_eq!(store.remaining(), TimeDelta::seconds(4));
/// }
/// ```
///
/// ## Real timer on paused time
///
/// ```rust
/// use tos_test_supervisor::orchestrator::SupervisionEnv;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     // Pauses tokio time, must not be called twice on the same runtime
///     let env = SupervisionEnv::paused();
///     assert_eq!(env.source.stray_notifications(), 0);
/// }
/// ```
pub struct SupervisionEnv<C, S> {
    /// Clock read by the guard and the runtime
    pub clock: Arc<C>,

    /// Interrupt source driving the alarm
    pub source: Arc<S>,

    /// Runtime whose units are dumped on expiry
    pub runtime: UnitRuntime,
}

impl SupervisionEnv<ManualClock, ManualInterruptSource> {
    /// Scripted clock and an alarm that only expires on `source.fire()`
    pub fn manual() -> Self {
        let clock = Arc::new(ManualClock::new());
        Self {
            runtime: UnitRuntime::new(clock.clone()),
            source: Arc::new(ManualInterruptSource::new()),
            clock,
        }
    }
}

impl SupervisionEnv<PausedClock, TimerInterruptSource> {
    /// Paused tokio time and a real timer sleeping on it
    ///
    /// Must be created inside a `current_thread` runtime where time is not yet
    /// paused.
    pub fn paused() -> Self {
        let clock = Arc::new(PausedClock::new());
        Self {
            runtime: UnitRuntime::new(clock.clone()),
            source: Arc::new(TimerInterruptSource::new(clock.clone())),
            clock,
        }
    }
}

impl<C, S> SupervisionEnv<C, S>
where
    C: Clock + 'static,
    S: InterruptSource + 'static,
{
    /// A phase guard over this environment
    pub fn guard(&self) -> PhaseGuard {
        let alarm = AlarmChannel::new(self.source.clone(), &self.runtime);
        PhaseGuard::new(alarm, self.clock.clone())
    }

    /// A runner builder over this environment
    pub fn runner(&self, config: HarnessConfig) -> TestRunnerBuilder {
        TestRunnerBuilder::from_config(config)
            .with_clock(self.clock.clone())
            .with_interrupt_source(self.source.clone())
            .with_runtime(self.runtime.clone())
    }
}
