//! Structured logging for the wallet engine
//!
//! All diagnostics go through the `log` facade. [`init`] installs an
//! `env_logger` backend once per process; later calls are no-ops. The
//! context helpers tag each line with the subsystem that produced it and
//! shorten identifiers passed in the parameter map.
//!
//! # Usage
//!
//! ```
//! use stakewallet_common::logging::{self, LogConfig, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_selection(
//!     LogLevel::Debug,
//!     "tier succeeded",
//!     Some(json!({ "conf_mine": 1, "conf_theirs": 10 })),
//! );
//! ```

use chrono::Local;
use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Subsystem tags for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Repository, balances, wallet facade
    Core,
    /// Candidate scanning and coin selection
    Selection,
    /// Building, committing and relaying transactions
    Transaction,
    /// Spent-state repair and re-acceptance
    Reconcile,
    /// Persistent store and key pool writes
    Storage,
}

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    pub include_source_location: bool,
    /// Whether to use JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_file: None,
            include_timestamps: true,
            include_source_location: false,
            json_format: false,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

static LOGGING_INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Only the first call configures the backend. An error is returned when the
/// log file cannot be opened on that first call.
pub fn init(config: &LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    let include_timestamps = config.include_timestamps;
    let include_source_location = config.include_source_location;
    let json_format = config.json_format;
    let log_file = config.log_file.clone();
    let level = config.level;

    LOGGING_INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level.into());

        builder.format(move |buf, record| {
            let timestamp = if include_timestamps {
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
            } else {
                String::new()
            };

            let source_location = if include_source_location {
                format!(" [{}:{}]", record.file().unwrap_or("unknown"), record.line().unwrap_or(0))
            } else {
                String::new()
            };

            if json_format {
                let line = json!({
                    "timestamp": timestamp,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "location": source_location,
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", line)
            } else {
                let mut style = buf.style();
                style.set_bold(true);
                if include_timestamps {
                    write!(buf, "{} ", timestamp)?;
                }
                writeln!(
                    buf,
                    "[{}{}] {}",
                    style.value(record.level()),
                    source_location,
                    record.args()
                )
            }
        });

        if let Some(file_path) = &log_file {
            match OpenOptions::new().create(true).append(true).open(file_path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => {
                    result = Err(format!("Failed to open log file {}: {}", file_path, e));
                    return;
                }
            }
        }

        if let Err(e) = builder.try_init() {
            // Another logger (usually a test harness) got there first
            debug!("Logger already initialized: {}", e);
        }
    });

    result
}

/// Shorten an identifier for logging, keeping its first and last four characters
pub fn sanitize_for_logging(input: &str) -> String {
    let len = input.len();
    if len <= 12 || !input.is_ascii() {
        return input.to_string();
    }
    format!("{}...{}", &input[..4], &input[len - 4..])
}

const SANITIZED_KEYS: &[&str] = &["txid", "address", "script", "destination"];

fn sanitize_params(params: serde_json::Value) -> serde_json::Value {
    match params {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = match (&v, SANITIZED_KEYS.contains(&k.as_str())) {
                        (serde_json::Value::String(s), true) => json!(sanitize_for_logging(s)),
                        _ => v,
                    };
                    (k, v)
                })
                .collect(),
        ),
        other => other,
    }
}

fn log_with_context(
    level: LogLevel,
    context: LogContext,
    message: &str,
    params: Option<serde_json::Value>,
) {
    match params.map(sanitize_params) {
        Some(p) => log::log!(level.into(), "[{:?}] {} {}", context, message, p),
        None => log::log!(level.into(), "[{:?}] {}", context, message),
    }
}

/// Log a core wallet event
pub fn log_core(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Core, message, params);
}

/// Log a coin selection event
pub fn log_selection(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Selection, message, params);
}

/// Log a transaction building or commit event
pub fn log_transaction(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Transaction, message, params);
}

/// Log a spent-state reconciliation event
pub fn log_reconcile(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Reconcile, message, params);
}

/// Log a storage event
pub fn log_storage(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Storage, message, params);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_long_identifier() {
        let txid = "7967a5185e907a25225574544c31f7b059c1a191d65b53dcc1554d339c4f9efc";
        assert_eq!(sanitize_for_logging(txid), "7967...9efc");
    }

    #[test]
    fn test_sanitize_keeps_short_values() {
        assert_eq!(sanitize_for_logging("42"), "42");
    }

    #[test]
    fn test_params_only_shorten_identifier_keys() {
        let txid = "7967a5185e907a25225574544c31f7b059c1a191d65b53dcc1554d339c4f9efc";
        let params = sanitize_params(json!({ "txid": txid, "value": 1234567890123u64 }));
        assert_eq!(params["txid"], json!("7967...9efc"));
        assert_eq!(params["value"], json!(1234567890123u64));
    }

    #[test]
    fn test_level_conversion() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::Warn);
        assert_eq!(log::Level::from(LogLevel::Trace), log::Level::Trace);
    }
}
