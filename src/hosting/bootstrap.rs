//! Hosting service registration.
//!
//! Registers the capabilities every host provides before the user callback
//! runs. Existing registrations are kept (`try_add`), and the callback runs
//! last so it can override anything.

use std::sync::Arc;

use crate::config::Configuration;
use crate::hosting::diagnostics::DiagnosticSource;
use crate::hosting::environment::{ApplicationEnvironment, HostingEnvironment};
use crate::hosting::services::ServiceRegistry;
use crate::hosting::startup::{StartupError, StartupLoader};
use crate::http::context::RequestContextFactory;
use crate::http::pipeline::{RequestServicesFilter, StartupFilter};
use crate::lifecycle::ApplicationLifetime;
use crate::observability::LoggerFactory;
use crate::server::ServerLoader;

/// Host-provided capabilities.
pub struct HostingCapabilities {
    pub configuration: Arc<Configuration>,
    pub environment: Arc<HostingEnvironment>,
    pub application_environment: Arc<ApplicationEnvironment>,
    pub logger_factory: Arc<LoggerFactory>,
    pub diagnostics: Arc<DiagnosticSource>,
    pub lifetime: Arc<ApplicationLifetime>,
    pub startup_loader: Arc<StartupLoader>,
    pub server_loader: Arc<ServerLoader>,
}

pub type ConfigureHostServicesFn =
    Arc<dyn Fn(&mut ServiceRegistry) -> Result<(), StartupError> + Send + Sync>;

pub fn bootstrap(
    mut registry: ServiceRegistry,
    capabilities: HostingCapabilities,
    user_callbacks: &[ConfigureHostServicesFn],
) -> Result<ServiceRegistry, StartupError> {
    registry
        .try_add_instance(capabilities.configuration)
        .try_add_instance(capabilities.environment)
        .try_add_instance(capabilities.application_environment)
        .try_add_instance(capabilities.logger_factory)
        .try_add_instance(capabilities.startup_loader)
        .try_add_instance(capabilities.server_loader)
        .try_add_singleton(|_| Ok(Arc::new(RequestContextFactory::new())))
        .try_add_instance(capabilities.diagnostics)
        .try_add_instance(capabilities.lifetime)
        .try_add_singleton::<dyn StartupFilter, _>(|_| Ok(Arc::new(RequestServicesFilter)));

    for callback in user_callbacks {
        callback(&mut registry)?;
    }

    tracing::debug!(services = registry.len(), "Hosting services registered");
    Ok(registry)
}
