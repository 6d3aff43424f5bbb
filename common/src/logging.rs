// Logger setup for the supervisor and the suites it runs
//
// Output goes to stdout through fern, optionally duplicated into a log file.
// Levels can be set per module with a `module:level` list, an empty module
// name sets the default level: `:warn,tos_test_supervisor:debug`.

use crate::error::ConfigurationError;
use anyhow::{Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct LogLevels {
    pub default: LevelFilter,
    pub modules: Vec<(String, LevelFilter)>,
}

impl LogLevels {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            modules: Vec::new(),
        }
    }

    // Verbosity as counted by the runner: more than 3 is debug, more than 1
    // is info, anything else only shows warnings and errors
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = if verbosity > 3 {
            LevelFilter::Debug
        } else if verbosity > 1 {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        };

        Self::new(level)
    }

    pub fn parse(spec: &str) -> Result<Self, ConfigurationError> {
        let mut levels = Self::new(LevelFilter::Warn);
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (module, level) = entry
                .rsplit_once(':')
                .ok_or_else(|| ConfigurationError::InvalidLogConfig(entry.to_string()))?;

            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| ConfigurationError::InvalidLogConfig(entry.to_string()))?;

            let module = module.trim();
            if module.is_empty() {
                levels.default = level;
            } else {
                levels.modules.push((module.to_string(), level));
            }
        }

        Ok(levels)
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub levels: LogLevels,
    pub colorize: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            levels: LogLevels::new(LevelFilter::Warn),
            colorize: true,
            log_file: None,
        }
    }
}

// Install the global logger, can only succeed once per process
pub fn setup_logger(options: &LogOptions) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::Magenta);

    let colorize = options.colorize;
    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            let level = if colorize {
                colors.color(record.level()).to_string()
            } else {
                record.level().to_string()
            };

            out.finish(format_args!(
                "{} [{:>5}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                level,
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(options.levels.default)
        .chain(console);
    for (module, level) in &options.levels.modules {
        dispatch = dispatch.level_for(module.clone(), *level);
    }

    if let Some(path) = &options.log_file {
        let file = fern::log_file(path)
            .with_context(|| format!("Error while opening log file {}", path.display()))?;

        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "{} [{:>5}] [{}] {}",
                        chrono::Utc::now().to_rfc3339(),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(file),
        );
    }

    dispatch
        .apply()
        .context("A global logger is already installed")?;

    // Panics inside units are logged with their backtrace
    log_panics::init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LogLevels::from_verbosity(0).default, LevelFilter::Warn);
        assert_eq!(LogLevels::from_verbosity(1).default, LevelFilter::Warn);
        assert_eq!(LogLevels::from_verbosity(2).default, LevelFilter::Info);
        assert_eq!(LogLevels::from_verbosity(4).default, LevelFilter::Debug);
    }

    #[test]
    fn test_parse_module_levels() {
        let levels = LogLevels::parse(":info, tos_test_supervisor:debug,fern:error").unwrap();
        assert_eq!(levels.default, LevelFilter::Info);
        assert_eq!(
            levels.modules,
            vec![
                ("tos_test_supervisor".to_string(), LevelFilter::Debug),
                ("fern".to_string(), LevelFilter::Error),
            ]
        );
    }

    #[test]
    fn test_parse_nested_module_path() {
        let levels = LogLevels::parse("tos_test_supervisor::timeout:trace").unwrap();
        assert_eq!(levels.default, LevelFilter::Warn);
        assert_eq!(
            levels.modules,
            vec![("tos_test_supervisor::timeout".to_string(), LevelFilter::Trace)]
        );
    }

    #[test]
    fn test_setup_logger_writes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.log");
        let options = LogOptions {
            levels: LogLevels::parse(":info").unwrap(),
            colorize: false,
            log_file: Some(path.clone()),
        };

        setup_logger(&options).unwrap();
        log::info!("logger ready");
        log::logger().flush();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("logger ready"));

        // Only one global logger per process
        assert!(setup_logger(&options).is_err());
    }

    #[test]
    fn test_parse_invalid_entries() {
        assert!(matches!(
            LogLevels::parse("debug"),
            Err(ConfigurationError::InvalidLogConfig(_))
        ));
        assert!(matches!(
            LogLevels::parse(":loud"),
            Err(ConfigurationError::InvalidLogConfig(_))
        ));
    }
}
