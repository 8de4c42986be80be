//! Log subscriber setup
//!
//! The crate itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_logging`] once at start-up:
//!
//! ```rust,ignore
//! use smon_regs::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development());
//! tracing::info!(device = 0, "instrument starting");
//! ```
//!
//! Useful filters: `smon_regs=debug` shows transfers and address-space
//! switches, `smon_regs::protocol=trace` shows every chunk and handshake.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Minimum level to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Machine-readable, one JSON object per event
    Json,
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One line per event
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include file and line of each event
    pub source_location: bool,
    pub thread_ids: bool,
    pub thread_names: bool,
    /// Directive string such as `smon_regs::protocol=trace`; overrides
    /// `RUST_LOG` and `level`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            source_location: false,
            thread_ids: false,
            thread_names: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Verbose, pretty output for bench work
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            source_location: true,
            thread_names: true,
            ..Default::default()
        }
    }

    /// JSON at info level for deployed instruments
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            thread_ids: true,
            ..Default::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            ..Default::default()
        }
    }

    /// Builder: set a directive filter
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Filter from the configured directives, else `RUST_LOG`, else the level
fn build_filter(config: &LogConfig) -> EnvFilter {
    let parsed = match config.filter {
        Some(ref directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    };
    parsed.unwrap_or_else(|| EnvFilter::new(config.level.as_str()))
}

fn build_layer(config: &LogConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
    }
}

/// Install the global subscriber
///
/// Returns false when a subscriber was already installed; the existing one
/// is kept.
pub fn init_logging(config: &LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(build_layer(config))
        .with(build_filter(config))
        .try_init()
        .is_ok()
}
