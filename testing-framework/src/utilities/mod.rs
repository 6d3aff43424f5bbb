// File: testing-framework/src/utilities/mod.rs
//
// Supervisor Utilities
//
// Session level helpers that sit next to the supervisor rather than in it.

/// Failure artifact persistence
pub mod artifacts;

/// Blockchain client version check run before the session
pub mod client_version;

pub use artifacts::{load_json_artifact, save_json_artifact};
pub use client_version::{check_client_version, ensure_supported, query_client_version};
