//! Logging setup for hosts embedding the preparation pipeline.
//!
//! Pipeline events carry a `component` field naming the module and a dotted `event`
//! field (`prepare.start`, `aggregate.finish`, ...). Hosts either install the subscriber
//! here or bring their own.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "FLOWPREP_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "FLOWPREP_LOG_FORMAT";
pub const LOG_TARGET_ENV: &str = "FLOWPREP_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = LoggingInitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(LoggingInitError::UnknownFormat(other.to_string())),
        }
    }
}

/// Subscriber settings. `level` is an `EnvFilter` directive string such as
/// `info` or `flowprep=debug,warn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingInitError> {
        EnvFilter::try_new(&self.level).map_err(|source| LoggingInitError::InvalidFilter {
            directives: self.level.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("unknown log format: {0}")]
    UnknownFormat(String),
    #[error("invalid log filter {directives:?}: {source}")]
    InvalidFilter {
        directives: String,
        #[source]
        source: ParseError,
    },
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|key| env::var(key).ok())
}

/// Builds a config from `lookup`, keeping the default for every unset, blank or
/// unrecognized value.
pub fn logging_config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = lookup(LOG_LEVEL_ENV) {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }
    if let Some(format) = lookup(LOG_FORMAT_ENV).and_then(|raw| raw.parse::<LogFormat>().ok()) {
        config.format = format;
    }
    if let Some(include_target) = lookup(LOG_TARGET_ENV).as_deref().and_then(parse_bool) {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter()?)
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> LoggingConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        logging_config_from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(from_pairs(&[]), LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = from_pairs(&[
            (LOG_LEVEL_ENV, "flowprep=debug"),
            (LOG_FORMAT_ENV, "JSON"),
            (LOG_TARGET_ENV, "off"),
        ]);

        assert_eq!(cfg.level, "flowprep=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
        assert!(cfg.env_filter().is_ok());
    }

    #[test]
    fn unrecognized_values_keep_defaults() {
        let cfg = from_pairs(&[
            (LOG_LEVEL_ENV, "  "),
            (LOG_FORMAT_ENV, "yaml"),
            (LOG_TARGET_ENV, "maybe"),
        ]);

        assert_eq!(cfg, LoggingConfig::default());
        assert!(matches!(
            "yaml".parse::<LogFormat>(),
            Err(LoggingInitError::UnknownFormat(format)) if format == "yaml"
        ));
    }

    #[test]
    fn malformed_directives_are_reported() {
        let cfg = LoggingConfig {
            level: "flowprep=loud".to_string(),
            ..LoggingConfig::default()
        };

        let err = cfg.env_filter().expect_err("bad level should not parse");
        assert!(matches!(
            err,
            LoggingInitError::InvalidFilter { ref directives, .. } if directives == "flowprep=loud"
        ));
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format": "json"}"#).expect("partial config should parse");
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "info");
        assert!(cfg.include_target);
    }
}
