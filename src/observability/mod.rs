//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Host, servers and deployer produce:
//!     → logging.rs (tracing events, categorized Loggers)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → DiagnosticSource subscribers (hosting::diagnostics)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request trace identifier is attached to request spans
//! - Metrics are cheap (no-op without a recorder)

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogLevel, LogSink, Logger, LoggerFactory, TracingSink};
