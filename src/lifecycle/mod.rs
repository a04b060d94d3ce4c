//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Application (application.rs):
//!     Host::start → application_started
//!     stop_application / Host::dispose → application_stopping → application_stopped
//!
//! Shutdown (shutdown.rs):
//!     Process exit / stop request → ShutdownSignal::trigger (fires once)
//!     → every ShutdownListener wakes, late listeners see the fired state
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Host::run leaves its wait loop → dispose
//! ```
//!
//! # Design Decisions
//! - One-shot signals use a watch channel so late observers are not lost
//! - Lifetime notifications are cancellation tokens (cheap clones, idempotent)

pub mod application;
pub mod shutdown;
pub mod signals;

pub use application::ApplicationLifetime;
pub use shutdown::{ShutdownListener, ShutdownSignal};
