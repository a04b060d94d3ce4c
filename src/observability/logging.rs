//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber for the binaries
//! - Provide the logger-factory capability registered in host services
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via `RUST_LOG`
//! - Loggers write through a [`LogSink`] so tests and embedders can capture output

use std::fmt;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "app_host=info,tower_http=info";

/// Install the global subscriber. Calling it twice is harmless; the second
/// call is ignored.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Destination of [`Logger`] records. Must accept concurrent calls.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, category: &str, message: &str);
}

/// Forwards records to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, category: &str, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(category, "{message}"),
            LogLevel::Info => tracing::info!(category, "{message}"),
            LogLevel::Warn => tracing::warn!(category, "{message}"),
            LogLevel::Error => tracing::error!(category, "{message}"),
        }
    }
}

/// Creates categorized [`Logger`]s sharing one sink.
#[derive(Clone)]
pub struct LoggerFactory {
    sink: Arc<dyn LogSink>,
}

impl LoggerFactory {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn create_logger(&self, category: impl Into<String>) -> Logger {
        Logger {
            category: category.into(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl Default for LoggerFactory {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for LoggerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerFactory").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Logger {
    category: String,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.sink.log(level, &self.category, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}
