// File: testing-framework/src/config.rs
//
// Harness Configuration
//
// Loaded once per process from a YAML file, environment variables take
// precedence. The two timeout ceilings have no default: a run without them
// is aborted before any test executes.

use crate::timeout::TimeoutCeilings;
use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tos_supervisor_common::config::{
    ENV_POST_MORTEM, ENV_TIMEOUT_LIMIT_SETUP_AND_CALL, ENV_TIMEOUT_LIMIT_TEARDOWN, ENV_WORKER,
    KEY_TIMEOUT_LIMIT_SETUP_AND_CALL, KEY_TIMEOUT_LIMIT_TEARDOWN,
};
use tos_supervisor_common::ethereum_clients::EthClient;
use tos_supervisor_common::logging::{setup_logger, LogLevels, LogOptions};
use tos_supervisor_common::ConfigurationError;

/// Environment variables relevant to the supervisor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Raw value of the shared ceiling override
    pub timeout_limit_for_setup_and_call: Option<String>,
    /// Raw value of the teardown ceiling override
    pub timeout_limit_teardown: Option<String>,
    /// Raw value of the post-mortem toggle
    pub post_mortem: Option<String>,
    /// Identifier of the distributed worker running this process
    pub worker: Option<String>,
}

impl EnvOverrides {
    /// Read the overrides from the process environment
    pub fn from_env() -> Self {
        // Empty values behave as unset
        let read = |key: &str| env::var(key).ok().filter(|value| !value.trim().is_empty());
        Self {
            timeout_limit_for_setup_and_call: read(ENV_TIMEOUT_LIMIT_SETUP_AND_CALL),
            timeout_limit_teardown: read(ENV_TIMEOUT_LIMIT_TEARDOWN),
            post_mortem: read(ENV_POST_MORTEM),
            worker: read(ENV_WORKER),
        }
    }

    /// Snapshot taken the first time it is needed
    pub fn get() -> &'static EnvOverrides {
        &ENV_OVERRIDES
    }

    /// True when this process is one worker of a distributed run
    pub fn is_worker(&self) -> bool {
        self.worker.is_some()
    }
}

lazy_static! {
    static ref ENV_OVERRIDES: EnvOverrides = EnvOverrides::from_env();
}

/// Configuration of a supervised run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Shared budget ceiling of setup and call, in seconds
    pub timeout_limit_for_setup_and_call: Option<f64>,
    /// Teardown budget ceiling, in seconds
    pub timeout_limit_teardown: Option<f64>,
    /// Open a post-mortem session on unhandled faults
    pub post_mortem: bool,
    /// Output verbosity, also enables the FLAKY feedback when above zero
    pub verbosity: u8,
    /// Per-module log levels, `:info,tos_test_supervisor:debug`
    pub log_config: Option<String>,
    /// Also write logs to this file
    pub log_file: Option<PathBuf>,
    /// Disable colored console output
    pub plain_log: bool,
    /// Blockchain client whose version is checked before the run
    pub blockchain_type: Option<EthClient>,
    /// Where the suite report is saved when a test failed
    pub report_dir: Option<PathBuf>,
}

impl HarnessConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigurationError> {
        serde_yaml::from_str(source).map_err(|err| ConfigurationError::Unreadable {
            path: "<inline>".to_string(),
            reason: err.to_string(),
        })
    }

    /// Load a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let unreadable = |reason: String| ConfigurationError::Unreadable {
            path: path.display().to_string(),
            reason,
        };

        let source = std::fs::read_to_string(path).map_err(|err| unreadable(err.to_string()))?;
        let config: Self = serde_yaml::from_str(&source).map_err(|err| unreadable(err.to_string()))?;
        debug!("Loaded harness configuration from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides on top of the file values
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) -> Result<(), ConfigurationError> {
        if let Some(value) = &overrides.timeout_limit_for_setup_and_call {
            self.timeout_limit_for_setup_and_call =
                Some(parse_secs(KEY_TIMEOUT_LIMIT_SETUP_AND_CALL, value)?);
        }
        if let Some(value) = &overrides.timeout_limit_teardown {
            self.timeout_limit_teardown = Some(parse_secs(KEY_TIMEOUT_LIMIT_TEARDOWN, value)?);
        }
        if let Some(value) = &overrides.post_mortem {
            self.post_mortem = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    /// Apply the process environment snapshot
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigurationError> {
        self.apply_overrides(EnvOverrides::get())?;
        Ok(self)
    }

    /// Both ceilings, failing if either is missing
    pub fn ceilings(&self) -> Result<TimeoutCeilings, ConfigurationError> {
        let setup_and_call =
            self.timeout_limit_for_setup_and_call
                .ok_or(ConfigurationError::MissingLimit {
                    key: KEY_TIMEOUT_LIMIT_SETUP_AND_CALL,
                })?;
        let teardown = self
            .timeout_limit_teardown
            .ok_or(ConfigurationError::MissingLimit {
                key: KEY_TIMEOUT_LIMIT_TEARDOWN,
            })?;

        Ok(TimeoutCeilings {
            setup_and_call,
            teardown,
        })
    }

    /// Logger options derived from verbosity and the log settings
    pub fn log_options(&self) -> Result<LogOptions, ConfigurationError> {
        let levels = match &self.log_config {
            Some(spec) => LogLevels::parse(spec)?,
            None => LogLevels::from_verbosity(self.verbosity),
        };

        Ok(LogOptions {
            levels,
            colorize: !self.plain_log,
            log_file: self.log_file.clone(),
        })
    }

    /// Install the process logger from these settings
    pub fn setup_logger(&self) -> anyhow::Result<()> {
        setup_logger(&self.log_options()?)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<f64, ConfigurationError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigurationError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}
