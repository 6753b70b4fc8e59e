//! Logging
//!
//! Structured logging through `tracing`. Level, format and destination come
//! from [`LoggingConfig`] and can be overridden with environment variables:
//!
//! - `CATFS_LOG`: full filter directive, e.g. `catfs::vcs=debug,info`
//! - `CATFS_LOG_FORMAT`: `text` or `json`
//! - `CATFS_LOG_OUTPUT`: `stdout`, `stderr` or `file`
//! - `CATFS_LOG_MODULES`: extra `module=level` pairs, comma separated

use crate::error::CatfsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = CatfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CatfsError::Config(format!(
                "invalid log format '{}' (must be 'text' or 'json')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
    File,
}

impl FromStr for LogOutput {
    type Err = CatfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(CatfsError::Config(format!(
                "invalid log output '{}' (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Only used with `LogOutput::File`
    pub file: PathBuf,
    /// ANSI colors, text format on a terminal only
    pub color: bool,
    /// Per-module levels, e.g. `catfs::linker = "debug"`
    pub modules: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: LogOutput::Stderr,
            file: PathBuf::from(".catfs/catfs.log"),
            color: true,
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if LevelFilter::from_str(&self.level).is_err() {
            return Err(format!("invalid log level '{}'", self.level));
        }

        for (module, level) in &self.modules {
            if LevelFilter::from_str(level).is_err() {
                return Err(format!("invalid log level '{}' for module '{}'", level, module));
            }
        }

        if self.output == LogOutput::File && self.file.as_os_str().is_empty() {
            return Err("log output is 'file' but no log file is set".to_string());
        }

        Ok(())
    }
}

/// Install the global subscriber. Fails if one is installed already.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), CatfsError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let writer = make_writer(output, &config.file)?;
    let ansi = config.color && output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };

    result.map_err(|err| CatfsError::Config(format!("cannot install logger: {}", err)))
}

fn make_writer(output: LogOutput, file: &Path) -> Result<BoxMakeWriter, CatfsError> {
    match output {
        LogOutput::Stdout => Ok(BoxMakeWriter::new(std::io::stdout)),
        LogOutput::Stderr => Ok(BoxMakeWriter::new(std::io::stderr)),
        LogOutput::File => {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    CatfsError::Config(format!("cannot create log directory: {}", err))
                })?;
            }

            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .map_err(|err| {
                    CatfsError::Config(format!("cannot open log file {}: {}", file.display(), err))
                })?;

            Ok(BoxMakeWriter::new(Mutex::new(handle)))
        }
    }
}

fn module_directive(module: &str, level: &str) -> Result<Directive, CatfsError> {
    format!("{}={}", module.trim(), level.trim())
        .parse()
        .map_err(|err| CatfsError::Config(format!("invalid log directive for {}: {}", module, err)))
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, CatfsError> {
    if let Ok(filter) = EnvFilter::try_from_env("CATFS_LOG") {
        return Ok(filter);
    }

    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(&config.level);
    for (module, level) in &config.modules {
        filter = filter.add_directive(module_directive(module, level)?);
    }

    if let Ok(modules) = std::env::var("CATFS_LOG_MODULES") {
        for entry in modules.split(',').filter(|s| !s.trim().is_empty()) {
            let Some((module, level)) = entry.split_once('=') else {
                return Err(CatfsError::Config(format!("invalid CATFS_LOG_MODULES entry '{}'", entry)));
            };
            filter = filter.add_directive(module_directive(module, level)?);
        }
    }

    Ok(filter)
}

fn determine_format(config: &LoggingConfig) -> Result<LogFormat, CatfsError> {
    match std::env::var("CATFS_LOG_FORMAT") {
        Ok(format) => format.parse(),
        Err(_) => Ok(config.format),
    }
}

fn determine_output(config: &LoggingConfig) -> Result<LogOutput, CatfsError> {
    match std::env::var("CATFS_LOG_OUTPUT") {
        Ok(output) => output.parse(),
        Err(_) => Ok(config.output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.color);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_format_and_output() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!("file".parse::<LogOutput>().unwrap(), LogOutput::File);
        assert!("both".parse::<LogOutput>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        let mut config = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.level = "debug".to_string();
        config
            .modules
            .insert("catfs::linker".to_string(), "chatty".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_module_directive() {
        assert!(module_directive("catfs::vcs", "debug").is_ok());
        assert!(module_directive("catfs::vcs", "chatty").is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoggingConfig = toml::from_str(
            r#"
level = "debug"
format = "json"

[modules]
"catfs::vcs" = "trace"
"#,
        )
        .unwrap();

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.modules["catfs::vcs"], "trace");
    }

    #[test]
    fn test_file_writer_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let log_file = dir.path().join("nested").join("catfs.log");
        make_writer(LogOutput::File, &log_file).unwrap();
        assert!(log_file.exists());
    }
}
