use thiserror::Error;

// Fatal, process level errors: the whole run is aborted before any test
// executes when one of them is raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{key} must be set in the harness configuration")]
    MissingLimit { key: &'static str },

    #[error("{key} must be a finite number of seconds, got `{value}`")]
    InvalidNumber { key: &'static str, value: String },

    #[error(
        "Invalid value for the timeout marker {timeout}s. This value must be smaller than \
         {limit}s. The runtime of a test has to stay below the no output timeout of the \
         continuous integration, otherwise the whole build is killed without a failure \
         report nor log files"
    )]
    OverrideExceedsCeiling { timeout: f64, limit: f64 },

    #[error("timeout must be positive, got {0}s")]
    NonPositiveSharedBudget(f64),

    #[error("timeout_limit_teardown must be positive, got {0}s")]
    NonPositiveTeardown(f64),

    #[error(
        "Invalid timeout marker, it must have exactly one argument for the timeout which may \
         be named or not (got {positional} positional and {named} named)"
    )]
    MalformedMarker { positional: usize, named: usize },

    #[error("Invalid timeout marker, unknown field `{0}`")]
    UnknownMarkerField(String),

    #[error("Unable to read configuration {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid log configuration `{0}`")]
    InvalidLogConfig(String),

    #[error("Unable to query the {client} version: {reason}")]
    ClientQuery { client: String, reason: String },

    #[error(
        "You are trying to run tests with an unsupported {client} version. Your version: \
         {found}, min supported version {minimum}, max supported version {highest}"
    )]
    UnsupportedClient {
        client: String,
        found: String,
        minimum: &'static str,
        highest: &'static str,
    },
}
