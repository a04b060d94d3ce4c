//! Request pipeline contract between the host and the application.
//!
//! # Data Flow
//! ```text
//! Server (axum / hyper)
//!     → host request handler
//!     → context.rs (RequestContextFactory, trace identifier)
//!     → pipeline.rs (startup filters' middleware → application middleware → terminal)
//!     → Response → server
//! ```

pub mod context;
pub mod pipeline;

pub use context::{RequestContext, RequestContextFactory, Response, X_REQUEST_ID};
pub use pipeline::{
    delegate, ApplicationBuilder, PipelineError, RequestDelegate, RequestServicesFilter, ResponseFuture,
    StartupFilter,
};
