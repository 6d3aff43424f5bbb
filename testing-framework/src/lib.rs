//! # TOS Test Supervisor
//!
//! Phase-aware timeout supervision for TOS test suites.
//!
//! ## Architecture Overview
//!
//! A test runs three phases on a single threaded tokio runtime:
//! - **Setup** and **Call** share one budget, what setup uses is no longer
//!   available to call
//! - **Teardown** always gets its own full budget, so cleanup is never
//!   starved by an overrun earlier in the test
//!
//! The alarm is the only source of preemption: when it expires, the running
//! phase is dropped at its next `.await` and the test fails with a
//! [`PhaseTimeoutExceeded`](timeout::PhaseTimeoutExceeded) naming the phase
//! and the exceeded limit.
//!
//! Background tasks spawned through [`UnitRuntime`](runtime::UnitRuntime) are
//! listed in timeout reports, and their unhandled faults can be inspected in
//! a post-mortem session through the [`DebugHook`](debug::DebugHook).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tos_test_supervisor::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = HarnessConfig::load("supervisor.yaml")?.with_env_overrides()?;
//!     setup_logger(&config.log_options()?)?;
//!
//!     let runner = TestRunnerBuilder::from_config(config).build()?;
//!     let report = runner.run_blocking(collect_tests())?;
//!     std::process::exit(if report.is_success() { 0 } else { 1 });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Harness configuration
pub mod config;

/// Exception debug hook and post-mortem sessions
pub mod debug;

/// Clock abstractions and supervision environments
pub mod orchestrator;

/// Test runner integration and reports
pub mod runner;

/// Cooperative unit runtime facade
pub mod runtime;

/// Budgets, alarm channel and phase guard
pub mod timeout;

/// Session helpers: client version check, artifacts
pub mod utilities;

// Convenient re-exports for common usage
pub mod prelude;

// Re-export commonly used types at crate root
pub use orchestrator::{Clock, ManualClock, PausedClock, SupervisionEnv, SystemClock};
pub use runner::{SupervisedTest, TestRunner, TestRunnerBuilder};
pub use timeout::{Phase, PhaseError, PhaseTimeoutExceeded};

/// Supervisor version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
