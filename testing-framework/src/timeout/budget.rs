//! Per-test budget store and limit validation
//!
//! Limits are resolved once per test, before setup runs. The shared budget is
//! then consumed by setup and call, the teardown limit never changes.

use super::{Phase, PhaseTimeoutExceeded, TimeoutCause};
use chrono::TimeDelta;
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tos_supervisor_common::config::{
    KEY_TIMEOUT_LIMIT_SETUP_AND_CALL, KEY_TIMEOUT_LIMIT_TEARDOWN, MARKER_TIMEOUT_FIELD,
};
use tos_supervisor_common::time::delta_from_secs;
use tos_supervisor_common::ConfigurationError;

/// Per-test timeout override, in seconds
///
/// Exactly one value is accepted, either positional or under the `timeout`
/// field. Anything else is rejected when the marker is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutMarker {
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<f64>,
    /// Named arguments
    #[serde(default)]
    pub kwargs: BTreeMap<String, f64>,
}

impl TimeoutMarker {
    /// Marker with a single positional duration
    pub fn positional(secs: f64) -> Self {
        Self {
            args: vec![secs],
            kwargs: BTreeMap::new(),
        }
    }

    /// Marker with the duration under the `timeout` field
    pub fn named(secs: f64) -> Self {
        Self {
            args: Vec::new(),
            kwargs: BTreeMap::from([(MARKER_TIMEOUT_FIELD.to_string(), secs)]),
        }
    }

    /// Marker built from raw arguments, validated by [`resolve`](Self::resolve)
    pub fn new(args: Vec<f64>, kwargs: BTreeMap<String, f64>) -> Self {
        Self { args, kwargs }
    }

    /// The single duration carried by the marker
    pub fn resolve(&self) -> Result<f64, ConfigurationError> {
        match (self.args.as_slice(), self.kwargs.len()) {
            ([secs], 0) => Ok(*secs),
            ([], 1) => match self.kwargs.get(MARKER_TIMEOUT_FIELD) {
                Some(secs) => Ok(*secs),
                None => Err(ConfigurationError::UnknownMarkerField(
                    self.kwargs.keys().next().cloned().unwrap_or_default(),
                )),
            },
            (args, named) => Err(ConfigurationError::MalformedMarker {
                positional: args.len(),
                named,
            }),
        }
    }
}

/// Configured ceilings, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutCeilings {
    /// Shared budget of setup and call
    pub setup_and_call: f64,
    /// Budget of teardown
    pub teardown: f64,
}

/// Validated limits of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutLimits {
    /// Effective shared budget of setup and call
    pub shared: TimeDelta,
    /// Budget of teardown
    pub teardown: TimeDelta,
}

impl TimeoutLimits {
    /// Validate the ceilings and apply the optional per-test override
    pub fn resolve(
        ceilings: &TimeoutCeilings,
        marker: Option<&TimeoutMarker>,
    ) -> Result<Self, ConfigurationError> {
        let ceiling = finite_secs(KEY_TIMEOUT_LIMIT_SETUP_AND_CALL, ceilings.setup_and_call)?;
        let teardown = finite_secs(KEY_TIMEOUT_LIMIT_TEARDOWN, ceilings.teardown)?;
        if teardown <= TimeDelta::zero() {
            return Err(ConfigurationError::NonPositiveTeardown(ceilings.teardown));
        }

        let (shared, shared_secs) = match marker {
            Some(marker) => {
                let secs = marker.resolve()?;
                let timeout = finite_secs(MARKER_TIMEOUT_FIELD, secs)?;
                if timeout > ceiling {
                    return Err(ConfigurationError::OverrideExceedsCeiling {
                        timeout: secs,
                        limit: ceilings.setup_and_call,
                    });
                }
                (timeout, secs)
            }
            None => (ceiling, ceilings.setup_and_call),
        };

        if shared <= TimeDelta::zero() {
            return Err(ConfigurationError::NonPositiveSharedBudget(shared_secs));
        }

        Ok(Self { shared, teardown })
    }
}

fn finite_secs(key: &'static str, secs: f64) -> Result<TimeDelta, ConfigurationError> {
    delta_from_secs(secs).ok_or_else(|| ConfigurationError::InvalidNumber {
        key,
        value: secs.to_string(),
    })
}

/// Result of accounting a finished phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSettlement {
    /// Budget left for the next phase
    Within {
        /// Remaining shared budget
        remaining: TimeDelta,
    },
    /// The phase used more than what was left
    Overrun {
        /// Remaining shared budget, negative
        remaining: TimeDelta,
    },
    /// The wall clock went backwards during the phase
    ClockSkew {
        /// Measured elapsed time, negative
        elapsed: TimeDelta,
    },
}

/// Mutable budget record of one test
#[derive(Debug, Clone)]
pub struct BudgetStore {
    limits: TimeoutLimits,
    remaining: TimeDelta,
    skewed: bool,
}

impl BudgetStore {
    /// Start a test with the full shared budget
    pub fn new(limits: TimeoutLimits) -> Self {
        Self {
            limits,
            remaining: limits.shared,
            skewed: false,
        }
    }

    /// Validated limits
    pub fn limits(&self) -> TimeoutLimits {
        self.limits
    }

    /// Remaining shared budget, negative once overrun
    pub fn remaining(&self) -> TimeDelta {
        self.remaining
    }

    /// Effective shared budget of setup and call
    pub fn shared_limit(&self) -> TimeDelta {
        self.limits.shared
    }

    /// Teardown budget, independent of what setup and call consumed
    pub fn teardown_limit(&self) -> TimeDelta {
        self.limits.teardown
    }

    /// True once the budget is in a faulting state
    pub fn is_exhausted(&self) -> bool {
        self.skewed || self.remaining < TimeDelta::zero()
    }

    /// Remaining budget a shared phase may be armed with
    ///
    /// Fails when the previous phase left nothing to run with, or when its
    /// measurement was skewed.
    pub fn ensure_available(&self, phase: Phase) -> Result<TimeDelta, PhaseTimeoutExceeded> {
        if self.skewed {
            return Err(self.timeout(phase, TimeoutCause::ClockSkew));
        }
        if self.remaining <= TimeDelta::zero() {
            return Err(self.timeout(phase, TimeoutCause::BudgetExhausted));
        }
        Ok(self.remaining)
    }

    /// Check done once call finished: a test that used exactly its budget
    /// still passes, an overrun fails it.
    pub fn ensure_within_budget(&self, phase: Phase) -> Result<(), PhaseTimeoutExceeded> {
        if self.skewed {
            return Err(self.timeout(phase, TimeoutCause::ClockSkew));
        }
        if self.remaining < TimeDelta::zero() {
            return Err(self.timeout(phase, TimeoutCause::BudgetExhausted));
        }
        Ok(())
    }

    /// Account the wall time a shared phase took
    pub fn settle(&mut self, elapsed: TimeDelta) -> BudgetSettlement {
        if elapsed < TimeDelta::zero() {
            // Never treat a skewed measurement as free: the budget only decreases
            self.skewed = true;
            self.remaining = self.remaining.min(elapsed);
            return BudgetSettlement::ClockSkew { elapsed };
        }

        self.remaining -= elapsed;
        trace!("Budget settled, {} left", self.remaining);
        if self.remaining < TimeDelta::zero() {
            BudgetSettlement::Overrun {
                remaining: self.remaining,
            }
        } else {
            BudgetSettlement::Within {
                remaining: self.remaining,
            }
        }
    }

    /// Timeout attributed to `phase` with the limit that applies to it
    pub fn timeout(&self, phase: Phase, cause: TimeoutCause) -> PhaseTimeoutExceeded {
        let limit = if phase.uses_shared_budget() {
            self.limits.shared
        } else {
            self.limits.teardown
        };
        PhaseTimeoutExceeded::new(phase, limit, cause)
    }
}
