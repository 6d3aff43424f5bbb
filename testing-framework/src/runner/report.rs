//! Per-test and per-suite outcomes
//!
//! The runner fills these, the reporting layer renders them. A failed suite
//! is also saved as a JSON artifact.

use crate::timeout::{Phase, PhaseError, TimeoutCause};
use crate::utilities::{load_json_artifact, save_json_artifact};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::Display;
use tos_supervisor_common::time::delta_as_secs_f64;

/// Outcome of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TestStatus {
    /// Every phase succeeded
    Passed,
    /// At least one phase failed
    Failed,
}

/// Timeout specific part of a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutDetails {
    /// Configured limit that was exceeded, in seconds
    pub limit_secs: f64,
    /// What triggered the timeout
    pub cause: TimeoutCause,
    /// Teardown timeouts may leak units into later tests
    pub severe: bool,
    /// Number of units alive when the alarm fired
    pub live_units: usize,
}

/// Failure of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// Phase that failed
    pub phase: Phase,
    /// Rendered error
    pub message: String,
    /// Set when the phase timed out
    pub timeout: Option<TimeoutDetails>,
}

impl From<&PhaseError> for PhaseFailure {
    fn from(error: &PhaseError) -> Self {
        Self {
            phase: error.phase(),
            message: error.to_string(),
            timeout: error.as_timeout().map(|timeout| TimeoutDetails {
                limit_secs: delta_as_secs_f64(timeout.limit),
                cause: timeout.cause,
                severe: timeout.is_severe(),
                live_units: timeout.live_units.len(),
            }),
        }
    }
}

/// Outcome of one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// Test name
    pub name: String,
    /// Passed or failed
    pub status: TestStatus,
    /// Failures in phase order, setup or call first then teardown
    pub failures: Vec<PhaseFailure>,
    /// Flaky test whose call failed
    pub flaky: bool,
    /// Wall time of the whole test (milliseconds)
    pub duration_ms: u64,
    /// Shared budget left after call, negative on overrun
    pub remaining_budget_secs: f64,
}

impl TestReport {
    /// True if every phase succeeded
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    /// Phase of the first failure
    pub fn failed_phase(&self) -> Option<Phase> {
        self.failures.first().map(|failure| failure.phase)
    }

    /// Limit exceeded by the first timeout, in seconds
    pub fn exceeded_limit(&self) -> Option<f64> {
        self.failures
            .iter()
            .find_map(|failure| failure.timeout.as_ref())
            .map(|timeout| timeout.limit_secs)
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.status.to_string().to_uppercase())?;
        if self.flaky {
            write!(f, " FLAKY")?;
        }
        for failure in &self.failures {
            write!(f, "\n  [{}] {}", failure.phase, failure.message)?;
        }
        Ok(())
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Wall time the run started
    pub started_at: DateTime<Utc>,
    /// Wall time the run ended
    pub finished_at: DateTime<Utc>,
    /// Number of passed tests
    pub passed: usize,
    /// Number of failed tests
    pub failed: usize,
    /// Number of failed tests flagged flaky
    pub flaky: usize,
    /// Every test, in execution order
    pub tests: Vec<TestReport>,
}

impl SuiteReport {
    /// Aggregate the reports of a run
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        tests: Vec<TestReport>,
    ) -> Self {
        let passed = tests.iter().filter(|test| test.passed()).count();
        let flaky = tests.iter().filter(|test| test.flaky).count();
        Self {
            started_at,
            finished_at,
            passed,
            failed: tests.len() - passed,
            flaky,
            tests,
        }
    }

    /// True when no test failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Report of the test named `name`
    pub fn test(&self, name: &str) -> Option<&TestReport> {
        self.tests.iter().find(|test| test.name == name)
    }

    /// One line summary
    pub fn summary(&self) -> String {
        let duration = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        let mut summary = format!("{} passed, {} failed", self.passed, self.failed);
        if self.flaky > 0 {
            summary.push_str(&format!(" ({} flaky)", self.flaky));
        }
        summary.push_str(&format!(" in {:.3}s", duration));
        summary
    }

    /// Save the report as a JSON artifact in `output_dir`
    pub async fn save(&self, output_dir: impl AsRef<Path>) -> Result<PathBuf> {
        save_json_artifact(output_dir, "supervisor_report", self).await
    }

    /// Load a report saved by [`save`](Self::save)
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_json_artifact(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::PhaseTimeoutExceeded;
    use anyhow::anyhow;
    use chrono::TimeDelta;

    fn passed(name: &str) -> TestReport {
        TestReport {
            name: name.to_string(),
            status: TestStatus::Passed,
            failures: Vec::new(),
            flaky: false,
            duration_ms: 10,
            remaining_budget_secs: 1.0,
        }
    }

    fn timed_out(name: &str) -> TestReport {
        let error: PhaseError =
            PhaseTimeoutExceeded::new(Phase::Call, TimeDelta::seconds(10), TimeoutCause::AlarmFired)
                .into();
        TestReport {
            name: name.to_string(),
            status: TestStatus::Failed,
            failures: vec![PhaseFailure::from(&error)],
            flaky: true,
            duration_ms: 10_000,
            remaining_budget_secs: 0.0,
        }
    }

    #[test]
    fn test_failure_from_timeout() {
        let report = timed_out("test_sync");
        assert_eq!(report.failed_phase(), Some(Phase::Call));
        assert_eq!(report.exceeded_limit(), Some(10.0));
        assert_eq!(
            report.to_string(),
            "test_sync FAILED FLAKY\n  [call] Setup and Call timeout >10s in call (alarm fired)"
        );
    }

    #[test]
    fn test_failure_from_work_error() {
        let error = PhaseError::Failed {
            phase: Phase::Teardown,
            error: anyhow!("node still running"),
        };
        let failure = PhaseFailure::from(&error);
        assert_eq!(failure.phase, Phase::Teardown);
        assert_eq!(failure.timeout, None);
        assert_eq!(failure.message, "teardown failed: node still running");
    }

    #[test]
    fn test_suite_counts_and_summary() {
        let started_at = Utc::now();
        let suite = SuiteReport::new(
            started_at,
            started_at + TimeDelta::milliseconds(2500),
            vec![passed("a"), timed_out("b"), passed("c")],
        );

        assert_eq!((suite.passed, suite.failed, suite.flaky), (2, 1, 1));
        assert!(!suite.is_success());
        assert!(suite.test("b").is_some_and(|test| !test.passed()));
        assert_eq!(suite.summary(), "2 passed, 1 failed (1 flaky) in 2.500s");
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let started_at = Utc::now();
        let suite = SuiteReport::new(started_at, started_at, vec![timed_out("b")]);

        let path = suite.save(dir.path()).await.unwrap();
        let loaded = SuiteReport::load(&path).await.unwrap();
        assert_eq!(loaded, suite);
    }
}
