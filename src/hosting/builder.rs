//! Host builder.
//!
//! # Data Flow
//! ```text
//! with_environment_variables / use_configuration / use_setting
//!     → merge → HostOptions → validate
//!     → ApplicationEnvironment (base_path override) → HostingEnvironment::initialize
//!     → bootstrap hosting services → hosting provider
//!     → resolve startup → build application services + pipeline
//!     → Host (PipelineBuilt)
//! ```
//!
//! # Design Decisions
//! - Consuming builder; `build` is synchronous and runs once
//! - One authoritative startup descriptor: a startup type beats a configure
//!   callback, which beats an assembly name; the `startup` setting is the
//!   fallback. Repeating a call of the same kind replaces the earlier one
//! - Startup failures are captured into a 500 fallback pipeline unless
//!   `capture_startup_errors` is off, in which case `build` returns them

use std::path::Path;
use std::sync::Arc;

use crate::config::{
    from_env, keys, merge, validate_options, Configuration, HostOptions, ENV_PREFIX,
};
use crate::hosting::bootstrap::{bootstrap, ConfigureHostServicesFn, HostingCapabilities};
use crate::hosting::diagnostics::{DiagnosticEvent, DiagnosticSource};
use crate::hosting::environment::{ApplicationEnvironment, HostingEnvironment};
use crate::hosting::error::HostError;
use crate::hosting::host::{Host, HostParts, HostState};
use crate::hosting::resolver::{build_application, fallback_pipeline, render_error, resolve};
use crate::hosting::services::ServiceRegistry;
use crate::hosting::startup::{
    ConfigureFn, Startup, StartupDescriptor, StartupError, StartupLoader, StartupRegistry,
    StartupType,
};
use crate::http::pipeline::ApplicationBuilder;
use crate::lifecycle::ApplicationLifetime;
use crate::observability::{metrics, LoggerFactory};
use crate::server::{ServerBinding, ServerFactory, ServerLoader};

pub struct HostBuilder {
    base: Configuration,
    external: Option<Configuration>,
    settings: Configuration,
    environment: HostingEnvironment,
    registry: ServiceRegistry,
    service_callbacks: Vec<ConfigureHostServicesFn>,
    startup_type: Option<StartupType>,
    startup_configure: Option<ConfigureFn>,
    startup_assembly: Option<String>,
    startup_registry: StartupRegistry,
    server_loader: ServerLoader,
    server_factory: Option<Arc<dyn ServerFactory>>,
    logger_factory: LoggerFactory,
    diagnostics: DiagnosticSource,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            base: Configuration::new(),
            external: None,
            settings: Configuration::new(),
            environment: HostingEnvironment::new(),
            registry: ServiceRegistry::new(),
            service_callbacks: Vec::new(),
            startup_type: None,
            startup_configure: None,
            startup_assembly: None,
            startup_registry: StartupRegistry::new(),
            server_loader: ServerLoader::with_defaults(),
            server_factory: None,
            logger_factory: LoggerFactory::default(),
            diagnostics: DiagnosticSource::new(),
        }
    }

    /// Read `APPHOST_*` environment variables as the base layer.
    pub fn with_environment_variables(mut self) -> Self {
        self.base.extend_from(&from_env(ENV_PREFIX));
        self
    }

    /// Settings every other source overrides.
    pub fn with_defaults(mut self, defaults: Configuration) -> Self {
        let mut base = defaults;
        base.extend_from(&self.base);
        self.base = base;
        self
    }

    /// Layer an external configuration. Later calls win per key; explicit
    /// settings still win over every external layer.
    pub fn use_configuration(mut self, configuration: Configuration) -> Self {
        match &mut self.external {
            Some(external) => {
                external.extend_from(&configuration);
            }
            None => self.external = Some(configuration),
        }
        self
    }

    pub fn use_setting(mut self, key: &str, value: impl Into<String>) -> Self {
        self.settings.set(key, value);
        self
    }

    pub fn use_environment(self, environment: &str) -> Self {
        self.use_setting(keys::ENVIRONMENT, environment)
    }

    /// Server location resolved through the server loader.
    pub fn use_server(self, name: &str) -> Self {
        self.use_setting(keys::SERVER, name)
    }

    pub fn use_urls<S: AsRef<str>>(self, urls: &[S]) -> Self {
        let joined = urls.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(";");
        self.use_setting(keys::URLS, joined)
    }

    pub fn use_base_path(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.use_setting(keys::BASE_PATH, path)
    }

    pub fn capture_startup_errors(self, capture: bool) -> Self {
        self.use_setting(keys::CAPTURE_STARTUP_ERRORS, capture.to_string())
    }

    /// Server instance; takes priority over the `server` setting.
    pub fn use_server_factory(mut self, factory: Arc<dyn ServerFactory>) -> Self {
        self.server_factory = Some(factory);
        self
    }

    pub fn use_startup<T: Startup>(self) -> Self {
        self.use_startup_type(StartupType::of::<T>())
    }

    pub fn use_startup_type(mut self, startup: StartupType) -> Self {
        self.startup_type = Some(startup);
        self
    }

    pub fn use_startup_assembly(mut self, assembly: &str) -> Self {
        self.startup_assembly = Some(assembly.to_string());
        self
    }

    /// Configure the pipeline with a callback. A startup type, when also
    /// set, takes precedence.
    pub fn configure<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut ApplicationBuilder) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.startup_configure = Some(Arc::new(configure));
        self
    }

    /// Add to the hosting services. Runs after the host's own registrations.
    pub fn configure_services<F>(mut self, configure: F) -> Self
    where
        F: Fn(&mut ServiceRegistry) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.service_callbacks.push(Arc::new(configure));
        self
    }

    pub fn use_startup_registry(mut self, registry: StartupRegistry) -> Self {
        self.startup_registry = registry;
        self
    }

    pub fn use_server_loader(mut self, loader: ServerLoader) -> Self {
        self.server_loader = loader;
        self
    }

    pub fn use_logger_factory(mut self, factory: LoggerFactory) -> Self {
        self.logger_factory = factory;
        self
    }

    pub fn use_diagnostics(mut self, diagnostics: DiagnosticSource) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn build(self) -> Result<Host, HostError> {
        let mut state = HostState::Unbuilt;

        let configuration = merge(&self.base, self.external.as_ref(), &self.settings);
        let options = HostOptions::from_configuration(&configuration);
        validate_options(&options).map_err(HostError::InvalidOptions)?;

        let mut application = ApplicationEnvironment::detect();
        if let Some(base_path) = &options.base_path {
            application = application.with_base_path(base_path);
        }
        if let Some(name) = &options.application {
            application = application.with_application_name(name);
        }

        let mut environment = self.environment;
        environment.initialize(&application, &options)?;

        let configuration = Arc::new(configuration);
        let environment = Arc::new(environment);
        let lifetime = Arc::new(ApplicationLifetime::new());
        let diagnostics = Arc::new(self.diagnostics);
        let logger_factory = Arc::new(self.logger_factory);

        let registry = bootstrap(
            self.registry,
            HostingCapabilities {
                configuration: Arc::clone(&configuration),
                environment: Arc::clone(&environment),
                application_environment: Arc::new(application),
                logger_factory: Arc::clone(&logger_factory),
                diagnostics: Arc::clone(&diagnostics),
                lifetime: Arc::clone(&lifetime),
                startup_loader: Arc::new(StartupLoader::new(self.startup_registry)),
                server_loader: Arc::new(self.server_loader),
            },
            &self.service_callbacks,
        )?;
        let hosting_services = registry.build();
        advance(&mut state, HostState::ServicesBuilt);

        let descriptor = self
            .startup_type
            .map(StartupDescriptor::Type)
            .or_else(|| self.startup_configure.map(StartupDescriptor::Configure))
            .or_else(|| self.startup_assembly.map(StartupDescriptor::Assembly))
            .or_else(|| options.startup.clone().map(StartupDescriptor::Assembly));

        let outcome = descriptor
            .ok_or(StartupError::NotConfigured)
            .and_then(|descriptor| resolve(&descriptor, &environment, &hosting_services))
            .and_then(|methods| {
                advance(&mut state, HostState::StartupResolved);
                build_application(&methods, &registry, &hosting_services)
            });

        let (services, pipeline, startup_error) = match outcome {
            Ok(application) => (application.services, application.pipeline, None),
            Err(err) if options.capture_startup_errors => {
                tracing::error!(
                    error = %err,
                    details = %render_error(&err),
                    "Application startup failed, serving the startup error page"
                );
                metrics::record_startup_failure();
                diagnostics.emit(DiagnosticEvent::StartupFailed {
                    error: err.to_string(),
                });
                let pipeline = fallback_pipeline(&err);
                (hosting_services.clone(), pipeline, Some(Arc::new(err)))
            }
            Err(err) => {
                hosting_services.dispose();
                return Err(HostError::Startup(err));
            }
        };
        advance(&mut state, HostState::PipelineBuilt);

        let server_binding = self
            .server_factory
            .map(ServerBinding::Factory)
            .or_else(|| options.server.clone().map(ServerBinding::Location));

        let logger = logger_factory.create_logger("app_host::hosting");
        Ok(Host::new(HostParts {
            options: Arc::new(options),
            configuration,
            environment,
            hosting_services,
            services,
            pipeline,
            server_binding,
            lifetime,
            diagnostics,
            logger,
            startup_error,
        }))
    }
}

fn advance(state: &mut HostState, next: HostState) {
    tracing::debug!(from = ?state, to = ?next, "Host state transition");
    *state = next;
}
