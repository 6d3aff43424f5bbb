// File: testing-framework/src/runner/mod.rs
//
// Test Runner Integration
//
// Sequences the phases of every test:
//   limits -> setup -> call -> overall budget check -> teardown
// Limits of every test are validated before the first one runs, a
// configuration error aborts the run. Teardown always runs, with its own
// budget, whatever happened before it.

/// Runner builder
pub mod builder;
/// Test and suite reports
pub mod report;

pub use builder::TestRunnerBuilder;
pub use report::{PhaseFailure, SuiteReport, TestReport, TestStatus, TimeoutDetails};

use crate::config::HarnessConfig;
use crate::debug::DebugHook;
use crate::orchestrator::Clock;
use crate::runtime::{panic_message, Fault, UnitRuntime};
#[cfg(unix)]
use crate::runtime::spawn_monitoring_signal;
use crate::timeout::{
    BudgetStore, Phase, PhaseError, PhaseGuard, TimeoutCeilings, TimeoutLimits, TimeoutMarker,
};
use crate::utilities::check_client_version;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{error, info, warn};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tos_supervisor_common::time::delta_as_secs_f64;
use tos_supervisor_common::ConfigurationError;

/// A test run under supervision
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use tos_test_supervisor::runner::SupervisedTest;
/// use tos_test_supervisor::timeout::TimeoutMarker;
///
/// struct SyncTest;
///
/// #[async_trait]
/// impl SupervisedTest for SyncTest {
///     fn name(&self) -> &str {
///         "test_sync"
///     }
///
///     fn timeout_marker(&self) -> Option<TimeoutMarker> {
///         Some(TimeoutMarker::named(30.0))
///     }
///
///     async fn call(&mut self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SupervisedTest: Send {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Per-test override of the shared budget
    fn timeout_marker(&self) -> Option<TimeoutMarker> {
        None
    }

    /// Known to fail intermittently
    fn is_flaky(&self) -> bool {
        false
    }

    /// Prepare fixtures
    async fn setup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// The test body
    async fn call(&mut self) -> anyhow::Result<()>;

    /// Release fixtures, runs even if setup or call failed
    async fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A test with its validated limits
pub struct TestItem {
    test: Box<dyn SupervisedTest>,
    limits: TimeoutLimits,
}

impl TestItem {
    /// Resolve the limits of `test`
    pub fn new(
        test: Box<dyn SupervisedTest>,
        ceilings: &TimeoutCeilings,
    ) -> Result<Self, ConfigurationError> {
        let marker = test.timeout_marker();
        match TimeoutLimits::resolve(ceilings, marker.as_ref()) {
            Ok(limits) => Ok(Self { test, limits }),
            Err(err) => {
                error!("Invalid timeout configuration for {}: {}", test.name(), err);
                Err(err)
            }
        }
    }

    /// Resolve every test, failing on the first invalid one
    pub fn collect(
        tests: Vec<Box<dyn SupervisedTest>>,
        ceilings: &TimeoutCeilings,
    ) -> Result<Vec<Self>, ConfigurationError> {
        tests
            .into_iter()
            .map(|test| Self::new(test, ceilings))
            .collect()
    }

    /// Test name
    pub fn name(&self) -> &str {
        self.test.name()
    }

    /// Validated limits
    pub fn limits(&self) -> TimeoutLimits {
        self.limits
    }
}

// Panics of a phase are failures of that phase, never of the runner
async fn catch_panics<F>(work: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

/// Runs tests under the phase guard
pub struct TestRunner {
    config: HarnessConfig,
    ceilings: TimeoutCeilings,
    clock: Arc<dyn Clock>,
    runtime: UnitRuntime,
    guard: PhaseGuard,
    debug_hook: Option<Arc<DebugHook>>,
    flaky_feedback: bool,
}

impl TestRunner {
    /// Configuration of the run
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Validated ceilings
    pub fn ceilings(&self) -> TimeoutCeilings {
        self.ceilings
    }

    /// Runtime whose units are supervised
    pub fn runtime(&self) -> &UnitRuntime {
        &self.runtime
    }

    /// Guard used for every phase
    pub fn guard(&self) -> &PhaseGuard {
        &self.guard
    }

    /// Debug hook, when post-mortem is enabled
    pub fn debug_hook(&self) -> Option<&Arc<DebugHook>> {
        self.debug_hook.as_ref()
    }

    /// Run every test in order
    ///
    /// # Errors
    ///
    /// A `ConfigurationError` is returned before any test ran: an invalid
    /// timeout marker, or an unsupported blockchain client. Test failures are
    /// part of the returned report.
    pub async fn run(
        &self,
        tests: Vec<Box<dyn SupervisedTest>>,
    ) -> Result<SuiteReport, ConfigurationError> {
        let items = TestItem::collect(tests, &self.ceilings)?;

        if let Some(client) = self.config.blockchain_type {
            check_client_version(client).await?;
        }

        let monitor = self.spawn_monitor();
        info!("Running {} tests", items.len());
        let started_at = self.clock.wall_time();
        let mut reports = Vec::with_capacity(items.len());
        for item in items {
            reports.push(self.run_item(item).await);
        }
        if let Some(monitor) = monitor {
            monitor.abort();
        }

        let suite = SuiteReport::new(started_at, self.clock.wall_time(), reports);
        if suite.is_success() {
            info!("{}", suite.summary());
        } else {
            warn!("{}", suite.summary());
            if let Some(dir) = &self.config.report_dir {
                match suite.save(dir).await {
                    Ok(path) => info!("Suite report saved to {}", path.display()),
                    Err(err) => warn!("Unable to save the suite report: {:#}", err),
                }
            }
        }

        Ok(suite)
    }

    // SIGUSR1 dumps the live units while the suite runs
    #[cfg(unix)]
    fn spawn_monitor(&self) -> Option<tokio::task::JoinHandle<()>> {
        match spawn_monitoring_signal(&self.runtime) {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("Unable to listen for the monitoring signal: {}", err);
                None
            }
        }
    }

    #[cfg(not(unix))]
    fn spawn_monitor(&self) -> Option<tokio::task::JoinHandle<()>> {
        None
    }

    /// Run the suite on a dedicated single threaded runtime
    pub fn run_blocking(
        &self,
        tests: Vec<Box<dyn SupervisedTest>>,
    ) -> anyhow::Result<SuiteReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.run(tests))?)
    }

    /// Run a single test through its three phases
    pub async fn run_item(&self, mut item: TestItem) -> TestReport {
        let name = item.name().to_string();
        let started_at = self.clock.wall_time();
        let mut store = BudgetStore::new(item.limits);
        let mut failures = Vec::new();
        info!("{} started", name);

        let setup = self
            .guard
            .run_shared(&mut store, Phase::Setup, catch_panics(item.test.setup()))
            .await;
        let call_failed = match setup {
            Ok(()) => {
                let call = self
                    .guard
                    .run_shared(&mut store, Phase::Call, catch_panics(item.test.call()))
                    .await
                    .and_then(|()| {
                        store
                            .ensure_within_budget(Phase::Call)
                            .map_err(PhaseError::from)
                    });
                match call {
                    Ok(()) => false,
                    Err(err) => {
                        failures.push(self.record_failure(&name, started_at, err));
                        true
                    }
                }
            }
            Err(err) => {
                failures.push(self.record_failure(&name, started_at, err));
                false
            }
        };

        let teardown = self
            .guard
            .run_teardown(&store, catch_panics(item.test.teardown()))
            .await;
        if let Err(err) = teardown {
            failures.push(self.record_failure(&name, started_at, err));
        }

        let flaky = call_failed && item.test.is_flaky() && self.flaky_feedback;
        if flaky {
            warn!("FLAKY {}", name);
        }

        let status = if failures.is_empty() {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        metrics::counter!("tos_supervisor_tests_total", "status" => status.to_string())
            .increment(1);

        let duration = self.clock.wall_time() - started_at;
        let report = TestReport {
            name,
            status,
            failures,
            flaky,
            duration_ms: duration.num_milliseconds().max(0) as u64,
            remaining_budget_secs: delta_as_secs_f64(store.remaining()),
        };
        if report.passed() {
            info!("{} passed", report.name);
        } else {
            error!("{}", report);
        }
        report
    }

    fn record_failure(
        &self,
        name: &str,
        started_at: DateTime<Utc>,
        err: PhaseError,
    ) -> PhaseFailure {
        let failure = PhaseFailure::from(&err);

        if let Some(hook) = &self.debug_hook {
            let age = (self.clock.wall_time() - started_at)
                .to_std()
                .unwrap_or_default();
            let fault = match err {
                PhaseError::Timeout(timeout) => Fault::Error(anyhow::Error::new(timeout)),
                PhaseError::Failed { error, .. } => Fault::from_error(error),
            };
            hook.inspect_failure(format!("{}::{}", name, failure.phase), age, &fault);
        }

        failure
    }
}
