//! Application host library: bootstrap, lifecycle and self-host deployment.

pub mod config;
pub mod deploy;
pub mod hosting;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;
pub mod welcome;

/// Boxed error used at user-code boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{Configuration, HostOptions};
pub use deploy::{ApplicationDeployer, DeploymentParameters, SelfHostDeployer, ServerType};
pub use hosting::{Host, HostBuilder, HostError, Startup, StartupHooks};
pub use lifecycle::{ApplicationLifetime, ShutdownSignal};
