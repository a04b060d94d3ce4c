//! Turns a startup descriptor into a built request pipeline.
//!
//! # Data Flow
//! ```text
//! StartupDescriptor
//!     → resolve (locate type, construct, select hooks)
//!     → build_application:
//!         clone hosting registry → configure_services → application provider
//!         → wrap configure with startup filters → ApplicationBuilder → RequestDelegate
//! ```
//!
//! # Design Decisions
//! - Every call into user code is panic-guarded so the capture policy also
//!   covers panics
//! - The fallback pipeline only holds the rendered error text

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;

use crate::hosting::environment::HostingEnvironment;
use crate::hosting::services::{panic_message, ServiceProvider, ServiceRegistry};
use crate::hosting::startup::{
    ConfigureFn, ConfigureServicesFn, StartupContext, StartupDescriptor, StartupError,
    StartupLoader,
};
use crate::http::context::Response;
use crate::http::pipeline::{delegate, ApplicationBuilder, RequestDelegate, StartupFilter};

/// Resolved startup hooks, ready to run.
#[derive(Clone)]
pub struct StartupMethods {
    pub type_name: String,
    pub configure_services: ConfigureServicesFn,
    pub configure: ConfigureFn,
}

impl std::fmt::Debug for StartupMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupMethods")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Output of a successful application build.
pub struct Application {
    pub services: ServiceProvider,
    pub pipeline: RequestDelegate,
}

/// Resolve `descriptor` for `environment` using the hosting `services`.
pub fn resolve(
    descriptor: &StartupDescriptor,
    environment: &Arc<HostingEnvironment>,
    services: &ServiceProvider,
) -> Result<StartupMethods, StartupError> {
    let startup_type = match descriptor {
        StartupDescriptor::Configure(configure) => {
            return Ok(StartupMethods {
                type_name: "configure callback".to_string(),
                configure_services: Arc::new(|_| Ok(())),
                configure: Arc::clone(configure),
            });
        }
        StartupDescriptor::Type(startup_type) => startup_type.clone(),
        StartupDescriptor::Assembly(assembly) => {
            let loader = services.resolve::<StartupLoader>()?;
            loader.load(assembly, environment.environment_name())?
        }
    };

    let type_name = startup_type.name().to_string();
    let context = StartupContext::new(Arc::clone(environment), services.clone());
    let hooks = guard(&format!("{type_name} construction"), || {
        startup_type.activate(&context)
    })?;

    let environment_name = environment.environment_name();
    let configure_services = match hooks.select_configure_services(environment_name, &type_name)? {
        Some((method, hook)) => wrap_hook(&type_name, method, hook),
        None => Arc::new(|_: &mut ServiceRegistry| Ok(())) as ConfigureServicesFn,
    };
    let (method, configure) = hooks.select_configure(environment_name, &type_name)?;
    let configure = wrap_hook(&type_name, method, configure);

    tracing::debug!(startup = %type_name, environment = environment_name, "Startup resolved");

    Ok(StartupMethods {
        type_name,
        configure_services,
        configure,
    })
}

/// Map hook errors to [`StartupError::Hook`] naming the hook and its type.
fn wrap_hook<A: ?Sized + 'static>(
    type_name: &str,
    method: String,
    hook: Arc<dyn Fn(&mut A) -> Result<(), StartupError> + Send + Sync>,
) -> Arc<dyn Fn(&mut A) -> Result<(), StartupError> + Send + Sync> {
    let type_name = type_name.to_string();
    Arc::new(move |target: &mut A| {
        hook(target).map_err(|err| StartupError::Hook {
            type_name: type_name.clone(),
            method: method.clone(),
            source: Box::new(err),
        })
    })
}

/// Run the startup hooks and build the application's services and pipeline.
pub fn build_application(
    methods: &StartupMethods,
    hosting_registry: &ServiceRegistry,
    hosting_services: &ServiceProvider,
) -> Result<Application, StartupError> {
    let mut registry = hosting_registry.clone();
    guard(&format!("{}::configure_services", methods.type_name), || {
        (methods.configure_services)(&mut registry)
    })?;
    let services = registry.build();

    match assemble(methods, &services, hosting_services) {
        Ok(pipeline) => Ok(Application { services, pipeline }),
        Err(err) => {
            services.dispose();
            Err(err)
        }
    }
}

fn assemble(
    methods: &StartupMethods,
    services: &ServiceProvider,
    hosting_services: &ServiceProvider,
) -> Result<RequestDelegate, StartupError> {
    let filters = hosting_services.resolve_all::<dyn StartupFilter>()?;
    let configure = filters
        .iter()
        .rev()
        .fold(Arc::clone(&methods.configure), |next, filter| {
            filter.configure(next)
        });

    let mut app = ApplicationBuilder::new(services.clone());
    guard(&format!("{}::configure", methods.type_name), || configure(&mut app))?;
    Ok(app.build())
}

fn guard<T>(
    location: &str,
    f: impl FnOnce() -> Result<T, StartupError>,
) -> Result<T, StartupError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(StartupError::Panicked {
            location: location.to_string(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

/// Pipeline answering every request with 500 and the startup error.
pub fn fallback_pipeline(error: &(dyn std::error::Error + 'static)) -> RequestDelegate {
    let body: Arc<str> = Arc::from(render_error(error));
    delegate(move |_ctx| {
        let body = Arc::clone(&body);
        async move { Ok(Response::text(StatusCode::INTERNAL_SERVER_ERROR, body.as_ref())) }
    })
}

/// The error and each `source()` in its chain, one per line.
pub fn render_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = String::from("An error occurred while starting the application.\n\n");
    text.push_str(&error.to_string());
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.push('\n');
    text
}
