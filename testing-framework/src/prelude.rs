//! Convenient re-exports for writing supervised suites
//!
//! ```rust
//! use tos_test_supervisor::prelude::*;
//! ```

pub use crate::config::{EnvOverrides, HarnessConfig};
pub use crate::debug::{
    DebugHook, DebugState, DiagnosticChannel, InteractivePostMortem, LogDiagnostics, PostMortem,
    PostMortemSession,
};
pub use crate::orchestrator::{Clock, ManualClock, PausedClock, SupervisionEnv, SystemClock};
pub use crate::runner::{
    SuiteReport, SupervisedTest, TestItem, TestReport, TestRunner, TestRunnerBuilder, TestStatus,
};
pub use crate::runtime::{Fault, FaultKind, FaultSink, UnitContext, UnitHandle, UnitRuntime};
pub use crate::timeout::{
    AlarmChannel, BudgetStore, InterruptSource, ManualInterruptSource, Phase, PhaseError,
    PhaseGuard, PhaseTimeoutExceeded, TimeoutCause, TimeoutCeilings, TimeoutLimits, TimeoutMarker,
    TimerInterruptSource,
};

pub use tos_supervisor_common::logging::setup_logger;
pub use tos_supervisor_common::ConfigurationError;

pub use async_trait::async_trait;
pub use std::sync::Arc;
pub use tokio::time::Duration;
