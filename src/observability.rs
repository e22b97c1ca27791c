//! Logging setup shared by `pvpc_auto_fill` and `pvpc_gap_audit`.
//!
//! Events go to stderr so stdout stays free for the per-geo summary lines.
//! Every event carries a `component` and a dotted `event` name
//! (`sync.month.written`, `gaps.detected`, ...).

use std::env;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Subscriber settings, read from `PVPC_LOG_LEVEL` (an `EnvFilter` directive),
/// `PVPC_LOG_FORMAT` (`json` or `pretty`) and `PVPC_LOG_TARGET`.
#[derive(Debug, Clone, PartialEq, Eq)]
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

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Unset, blank or unparseable variables keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("PVPC_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("PVPC_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("PVPC_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

/// Installs the global stderr subscriber. Call once, before the first event.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty))
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

/// First event of a binary run; `component` is the binary name.
pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_finish(component: &'static str, geos: usize, elapsed_ms: u64) {
    info!(component, event = "app.finish", geos, elapsed_ms);
}

/// Logged right before the process exits with `exit_code`.
pub fn log_app_failure(component: &'static str, reason: &str, exit_code: u8) {
    error!(component, event = "app.failure", reason, exit_code);
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
