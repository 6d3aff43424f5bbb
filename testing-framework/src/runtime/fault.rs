//! Unhandled unit faults
//!
//! A unit terminates with a fault when its future returns an error, panics or
//! is dropped before completion. Two kinds are benign: cancellation of the
//! unit and an explicit exit request. They are still reported, but they are
//! never a reason to stop and inspect the process.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Error a unit returns to ask for the process to exit
///
/// The supervisor never exits the process on behalf of a unit, the request
/// is reported and the suite carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("exit requested with code {code}")]
pub struct ExitRequest {
    /// Requested exit code
    pub code: i32,
}

/// Classification of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The unit panicked
    Panic,
    /// The unit returned an error
    Error,
    /// The unit was cancelled before completion
    Cancelled,
    /// The unit returned an [`ExitRequest`]
    ExitRequested,
}

impl FaultKind {
    /// Label used for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Panic => "panic",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::ExitRequested => "exit_requested",
        }
    }

    /// Benign kinds are reported but never open a post-mortem session
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ExitRequested)
    }
}

/// Fault value delivered to the fault sink
#[derive(Debug)]
pub enum Fault {
    /// The unit panicked with the given message
    Panic {
        /// Panic payload rendered as text
        message: String,
    },
    /// The unit returned an error
    Error(anyhow::Error),
    /// The unit was dropped before completion
    Cancelled,
    /// The unit asked for the process to exit
    ExitRequested {
        /// Requested exit code
        code: i32,
    },
}

impl Fault {
    /// Classify an error returned by a unit
    pub fn from_error(error: anyhow::Error) -> Self {
        match error.downcast_ref::<ExitRequest>() {
            Some(request) => Self::ExitRequested { code: request.code },
            None => Self::Error(error),
        }
    }

    /// Build a fault from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::Panic {
            message: panic_message(payload.as_ref()),
        }
    }

    /// Kind of this fault
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Panic { .. } => FaultKind::Panic,
            Self::Error(_) => FaultKind::Error,
            Self::Cancelled => FaultKind::Cancelled,
            Self::ExitRequested { .. } => FaultKind::ExitRequested,
        }
    }

    /// Shortcut for `kind().is_benign()`
    pub fn is_benign(&self) -> bool {
        self.kind().is_benign()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic { message } => write!(f, "panicked: {}", message),
            Self::Error(error) => write!(f, "failed: {:#}", error),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ExitRequested { code } => write!(f, "exit requested with code {}", code),
        }
    }
}

/// Render a panic payload, `panic!` produces either `&str` or `String`
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_exit_request_is_benign() {
        let fault = Fault::from_error(anyhow::Error::new(ExitRequest { code: 2 }));
        assert_eq!(fault.kind(), FaultKind::ExitRequested);
        assert!(fault.is_benign());
        assert_eq!(fault.to_string(), "exit requested with code 2");
    }

    #[test]
    fn test_exit_request_with_context_is_still_recognised() {
        let error = anyhow::Error::new(ExitRequest { code: 1 }).context("shutting down node");
        assert_eq!(Fault::from_error(error).kind(), FaultKind::ExitRequested);
    }

    #[test]
    fn test_plain_error_is_not_benign() {
        let fault = Fault::from_error(anyhow!("connection reset"));
        assert_eq!(fault.kind(), FaultKind::Error);
        assert!(!fault.is_benign());
        assert_eq!(fault.to_string(), "failed: connection reset");
    }

    #[test]
    fn test_panic_payloads() {
        let fault = Fault::from_panic(Box::new("boom"));
        assert_eq!(fault.to_string(), "panicked: boom");

        let fault = Fault::from_panic(Box::new(String::from("owned boom")));
        assert_eq!(fault.to_string(), "panicked: owned boom");

        let fault = Fault::from_panic(Box::new(42u32));
        assert_eq!(fault.to_string(), "panicked: <non-string panic payload>");
    }

    #[test]
    fn test_cancelled_is_benign() {
        assert!(Fault::Cancelled.is_benign());
        assert_eq!(FaultKind::Cancelled.as_label(), "cancelled");
    }
}
