// File: testing-framework/src/timeout/mod.rs
//
// Phase Timeouts
//
// A test runs three phases. Setup and call draw from one shared budget with
// carry-over, teardown always gets its own full budget so cleanup is never
// starved by an overrun earlier in the test.

/// Process-wide alarm and interrupt sources
pub mod alarm;
/// Per-test budget store and limit validation
pub mod budget;
/// Scoped supervision of a single phase
pub mod guard;

pub use alarm::{
    AlarmChannel, AlarmHandler, ArmedAlarm, InterruptCall, InterruptSource,
    ManualInterruptSource, TimerInterruptSource,
};
pub use budget::{BudgetSettlement, BudgetStore, TimeoutCeilings, TimeoutLimits, TimeoutMarker};
pub use guard::PhaseGuard;

use crate::runtime::{format_run_info, UnitSnapshot};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;
use tos_supervisor_common::time::format_secs;

/// Stage of a single test
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Fixture preparation
    Setup,
    /// The test body
    Call,
    /// Finalizers
    Teardown,
}

impl Phase {
    /// Setup and call share one budget
    pub fn uses_shared_budget(&self) -> bool {
        !matches!(self, Self::Teardown)
    }
}

/// Why a phase was declared timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutCause {
    /// The alarm expired while the phase was running
    #[strum(serialize = "alarm fired")]
    AlarmFired,
    /// No budget was left when the phase was about to start
    #[strum(serialize = "budget exhausted")]
    BudgetExhausted,
    /// The wall clock went backwards while measuring a previous phase
    #[strum(serialize = "clock skew detected")]
    ClockSkew,
}

/// A phase exceeded its configured limit
#[derive(Debug, Clone, PartialEq, Error)]
pub struct PhaseTimeoutExceeded {
    /// Phase that failed
    pub phase: Phase,
    /// Configured limit that was exceeded
    pub limit: TimeDelta,
    /// What triggered the failure
    pub cause: TimeoutCause,
    /// Units still alive when the alarm fired
    pub live_units: Vec<UnitSnapshot>,
}

impl PhaseTimeoutExceeded {
    /// Timeout without a live unit dump
    pub fn new(phase: Phase, limit: TimeDelta, cause: TimeoutCause) -> Self {
        Self {
            phase,
            limit,
            cause,
            live_units: Vec::new(),
        }
    }

    /// Attach the live units captured at expiry
    pub fn with_live_units(mut self, live_units: Vec<UnitSnapshot>) -> Self {
        self.live_units = live_units;
        self
    }

    /// Teardown timeouts mean finalizers did not all run
    pub fn is_severe(&self) -> bool {
        self.phase == Phase::Teardown
    }
}

impl fmt::Display for PhaseTimeoutExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Teardown => write!(
                f,
                "Teardown timeout >{} ({}). Not all finalizers of the test ran, fixtures may \
                 not be cleaned up and the units still alive can make later tests flaky",
                format_secs(self.limit),
                self.cause
            )?,
            phase => write!(
                f,
                "Setup and Call timeout >{} in {} ({})",
                format_secs(self.limit),
                phase,
                self.cause
            )?,
        }

        if !self.live_units.is_empty() {
            write!(f, "\nLive units:\n{}", format_run_info(&self.live_units))?;
        }
        Ok(())
    }
}

/// Failure of a supervised phase
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The phase ran out of time
    #[error(transparent)]
    Timeout(#[from] PhaseTimeoutExceeded),

    /// The phase's own work failed, the error is passed through unchanged
    #[error("{phase} failed: {error:#}")]
    Failed {
        /// Phase that failed
        phase: Phase,
        /// Error returned by the work
        error: anyhow::Error,
    },
}

impl PhaseError {
    /// Phase the error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Self::Timeout(timeout) => timeout.phase,
            Self::Failed { phase, .. } => *phase,
        }
    }

    /// The timeout, if this is one
    pub fn as_timeout(&self) -> Option<&PhaseTimeoutExceeded> {
        match self {
            Self::Timeout(timeout) => Some(timeout),
            Self::Failed { .. } => None,
        }
    }

    /// True for timeouts, whatever their cause
    pub fn is_timeout(&self) -> bool {
        self.as_timeout().is_some()
    }
}
