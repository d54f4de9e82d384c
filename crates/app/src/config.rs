//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::{CommandConfig, RetryPolicy};
use event_bus::{BusConfig, DeliveryMode};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {key}={value:?}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Runtime settings.
///
/// | variable                   | default      |
/// |----------------------------|--------------|
/// | `RUST_LOG`                 | `info`       |
/// | `LOG_FORMAT`               | `pretty`     |
/// | `DATABASE_URL`             | unset: in-memory store |
/// | `COMMAND_MAX_RETRIES`      | `3`          |
/// | `COMMAND_RETRY_BACKOFF_MS` | `10`         |
/// | `COMMAND_TIMEOUT_MS`       | unset or `0`: no timeout |
/// | `BUS_DELIVERY_MODE`        | `background` |
/// | `BUS_MAX_ATTEMPTS`         | `3`          |
/// | `BUS_RETRY_BACKOFF_MS`     | `50`         |
/// | `SNAPSHOT_INTERVAL`        | `0` (off)    |
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub command: CommandConfig,
    pub bus: BusConfig,
    pub snapshot_interval: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_retries = parse_or(&lookup, "COMMAND_MAX_RETRIES", 3u32)?;
        let retry_backoff = millis_or(&lookup, "COMMAND_RETRY_BACKOFF_MS", 10)?;
        let mut command = CommandConfig::new(RetryPolicy::bounded(max_retries, retry_backoff));
        let timeout = millis_or(&lookup, "COMMAND_TIMEOUT_MS", 0)?;
        if !timeout.is_zero() {
            command = command.with_timeout(timeout);
        }

        let bus = BusConfig {
            mode: parse_or(&lookup, "BUS_DELIVERY_MODE", DeliveryMode::Background)?,
            ..BusConfig::default()
        }
        .with_retries(
            parse_or(&lookup, "BUS_MAX_ATTEMPTS", 3u32)?,
            millis_or(&lookup, "BUS_RETRY_BACKOFF_MS", 50)?,
        );

        Ok(Self {
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Pretty)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            command,
            bus,
            snapshot_interval: parse_or(&lookup, "SNAPSHOT_INTERVAL", 0u64)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default).map(Duration::from_millis)
}
