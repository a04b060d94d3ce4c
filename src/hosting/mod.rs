//! Host Lifecycle Subsystem
//!
//! Builds a host from configuration, services and startup logic, binds it to
//! a server and tears it down again.
//!
//! # Responsibilities
//! - Merge configuration into a `HostOptions` snapshot and initialise the
//!   hosting environment once
//! - Register the hosting services, then the application services
//! - Resolve and run the startup hooks, capturing failures on request
//! - Start the bound server and dispose everything in order
//!
//! # Data Flow
//! ```text
//! HostBuilder ──build──▶ Host (PipelineBuilt) ──start──▶ Started ──dispose──▶ Disposed
//!      │                     │
//!      ├─ bootstrap          └─ RequestContextFactory → pipeline → Response
//!      └─ resolver (startup hooks, fallback pipeline)
//! ```
//!
//! # Design Decisions
//! - No global state: every host owns its services, diagnostics and lifetime
//! - The service container is a small typed registry keyed by `TypeId`

pub mod bootstrap;
pub mod builder;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod host;
pub mod resolver;
pub mod services;
pub mod startup;

pub use builder::HostBuilder;
pub use diagnostics::{DiagnosticEvent, DiagnosticSource};
pub use environment::{ApplicationEnvironment, EnvironmentError, HostingEnvironment};
pub use error::HostError;
pub use host::{Host, HostState};
pub use services::{
    Disposable, ServiceError, ServiceLifetime, ServiceProvider, ServiceRegistry,
};
pub use startup::{
    Startup, StartupContext, StartupDescriptor, StartupError, StartupHooks, StartupLoader,
    StartupRegistry, StartupType,
};
