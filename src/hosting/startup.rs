//! Startup types and their configuration hooks.
//!
//! # Responsibilities
//! - Define the [`Startup`] contract and the hook table it fills
//! - Pick the environment-specific hook over the generic one
//! - Map assembly names to startup types ([`StartupRegistry`])
//!
//! # Design Decisions
//! - No reflection: a startup registers its hooks explicitly in `hooks`
//! - Hook lookup is `configure_{environment}` then `configure`; exactly one
//!   configure hook must exist, configure-services hooks are optional
//! - Environment names compare case-insensitively
//! - Assemblies are explicit registry entries populated at process start

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::hosting::environment::HostingEnvironment;
use crate::hosting::services::{ServiceError, ServiceProvider, ServiceRegistry};
use crate::http::pipeline::ApplicationBuilder;
use crate::BoxError;

pub type ConfigureFn =
    Arc<dyn Fn(&mut ApplicationBuilder) -> Result<(), StartupError> + Send + Sync>;

pub type ConfigureServicesFn =
    Arc<dyn Fn(&mut ServiceRegistry) -> Result<(), StartupError> + Send + Sync>;

const CONFIGURE: &str = "configure";
const CONFIGURE_SERVICES: &str = "configure_services";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("no startup configured: call use_startup, configure or set the `startup` setting")]
    NotConfigured,

    #[error("startup assembly `{assembly}` is not registered")]
    AssemblyNotFound { assembly: String },

    #[error("no type named `{preferred}` or `{fallback}` found in startup assembly `{assembly}`")]
    TypeNotFound {
        assembly: String,
        preferred: String,
        fallback: String,
    },

    #[error("no `{preferred}` or `{fallback}` hook found on startup type `{type_name}`")]
    MissingMethod {
        type_name: String,
        preferred: String,
        fallback: String,
    },

    #[error("more than one `{method}` hook registered on startup type `{type_name}`")]
    AmbiguousMethod { type_name: String, method: String },

    #[error("failed to construct startup type `{type_name}`")]
    Construction {
        type_name: String,
        #[source]
        source: BoxError,
    },

    #[error("`{method}` hook of startup type `{type_name}` failed")]
    Hook {
        type_name: String,
        method: String,
        #[source]
        source: BoxError,
    },

    #[error("startup code panicked in {location}: {message}")]
    Panicked { location: String, message: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Other(BoxError),
}

impl StartupError {
    pub fn other(err: impl Into<BoxError>) -> Self {
        StartupError::Other(err.into())
    }
}

/// Hook table filled by [`Startup::hooks`].
#[derive(Default, Clone)]
pub struct StartupHooks {
    configure: Vec<(Option<String>, ConfigureFn)>,
    configure_services: Vec<(Option<String>, ConfigureServicesFn)>,
}

impl StartupHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generic `configure` hook.
    pub fn configure<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut ApplicationBuilder) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.configure.push((None, Arc::new(hook)));
        self
    }

    /// `configure_{environment}` hook.
    pub fn configure_for<F>(&mut self, environment: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut ApplicationBuilder) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.configure.push((Some(environment.to_string()), Arc::new(hook)));
        self
    }

    pub fn configure_services<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut ServiceRegistry) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.configure_services.push((None, Arc::new(hook)));
        self
    }

    pub fn configure_services_for<F>(&mut self, environment: &str, hook: F) -> &mut Self
    where
        F: Fn(&mut ServiceRegistry) -> Result<(), StartupError> + Send + Sync + 'static,
    {
        self.configure_services
            .push((Some(environment.to_string()), Arc::new(hook)));
        self
    }

    /// Select the configure hook for `environment`. Returns the hook name
    /// that matched.
    pub(crate) fn select_configure(
        &self,
        environment: &str,
        type_name: &str,
    ) -> Result<(String, ConfigureFn), StartupError> {
        select(&self.configure, CONFIGURE, environment, type_name)?.ok_or_else(|| {
            StartupError::MissingMethod {
                type_name: type_name.to_string(),
                preferred: hook_name(CONFIGURE, environment),
                fallback: CONFIGURE.to_string(),
            }
        })
    }

    pub(crate) fn select_configure_services(
        &self,
        environment: &str,
        type_name: &str,
    ) -> Result<Option<(String, ConfigureServicesFn)>, StartupError> {
        select(
            &self.configure_services,
            CONFIGURE_SERVICES,
            environment,
            type_name,
        )
    }
}

impl fmt::Debug for StartupHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T>(hooks: &[(Option<String>, T)], base: &str) -> Vec<String> {
            hooks
                .iter()
                .map(|(env, _)| match env {
                    Some(env) => hook_name(base, env),
                    None => base.to_string(),
                })
                .collect()
        }
        f.debug_struct("StartupHooks")
            .field("configure", &names(&self.configure, CONFIGURE))
            .field(
                "configure_services",
                &names(&self.configure_services, CONFIGURE_SERVICES),
            )
            .finish()
    }
}

fn hook_name(base: &str, environment: &str) -> String {
    format!("{base}_{}", environment.to_ascii_lowercase())
}

fn select<T: Clone>(
    hooks: &[(Option<String>, T)],
    base: &str,
    environment: &str,
    type_name: &str,
) -> Result<Option<(String, T)>, StartupError> {
    let specific: Vec<&T> = hooks
        .iter()
        .filter(|(env, _)| {
            env.as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(environment))
        })
        .map(|(_, hook)| hook)
        .collect();

    let generic: Vec<&T> = hooks
        .iter()
        .filter(|(env, _)| env.is_none())
        .map(|(_, hook)| hook)
        .collect();

    for (name, found) in [
        (hook_name(base, environment), specific),
        (base.to_string(), generic),
    ] {
        match found.as_slice() {
            [] => continue,
            [hook] => return Ok(Some((name, (*hook).clone()))),
            _ => {
                return Err(StartupError::AmbiguousMethod {
                    type_name: type_name.to_string(),
                    method: name,
                })
            }
        }
    }
    Ok(None)
}

/// What a startup type sees while being constructed.
#[derive(Debug, Clone)]
pub struct StartupContext {
    environment: Arc<HostingEnvironment>,
    services: ServiceProvider,
}

impl StartupContext {
    pub fn new(environment: Arc<HostingEnvironment>, services: ServiceProvider) -> Self {
        Self {
            environment,
            services,
        }
    }

    pub fn environment(&self) -> &HostingEnvironment {
        &self.environment
    }

    /// Hosting services.
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn resolve<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.resolve::<T>()
    }
}

/// An application startup object.
///
/// `create` may resolve hosting services from the context; `hooks` registers
/// the configure / configure-services hooks, usually capturing `self`.
pub trait Startup: Send + Sync + Sized + 'static {
    fn create(context: &StartupContext) -> Result<Self, StartupError>;

    fn hooks(self: Arc<Self>, hooks: &mut StartupHooks);
}

type Activator = Arc<dyn Fn(&StartupContext) -> Result<StartupHooks, StartupError> + Send + Sync>;

/// A named constructor for a startup object.
#[derive(Clone)]
pub struct StartupType {
    name: String,
    activate: Activator,
}

impl StartupType {
    /// Startup type for `T`, named after its unqualified type name.
    pub fn of<T: Startup>() -> Self {
        let name = short_type_name::<T>().to_string();
        let type_name = name.clone();
        Self {
            name,
            activate: Arc::new(move |context: &StartupContext| -> Result<StartupHooks, StartupError> {
                let startup = T::create(context).map_err(|err| StartupError::Construction {
                    type_name: type_name.clone(),
                    source: Box::new(err),
                })?;
                let mut hooks = StartupHooks::new();
                Arc::new(startup).hooks(&mut hooks);
                Ok(hooks)
            }),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, activate: F) -> Self
    where
        F: Fn(&StartupContext) -> Result<StartupHooks, StartupError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            activate: Arc::new(activate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn activate(&self, context: &StartupContext) -> Result<StartupHooks, StartupError> {
        (self.activate)(context)
    }
}

impl fmt::Debug for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupType").field("name", &self.name).finish()
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Assembly name → startup types.
#[derive(Debug, Clone, Default)]
pub struct StartupRegistry {
    assemblies: BTreeMap<String, Vec<StartupType>>,
}

impl StartupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, assembly: &str, startup: StartupType) -> &mut Self {
        self.assemblies
            .entry(assembly.to_ascii_lowercase())
            .or_default()
            .push(startup);
        self
    }

    pub fn register_type<T: Startup>(&mut self, assembly: &str) -> &mut Self {
        self.register(assembly, StartupType::of::<T>())
    }

    pub fn contains_assembly(&self, assembly: &str) -> bool {
        self.assemblies.contains_key(&assembly.to_ascii_lowercase())
    }

    /// Find `Startup{Environment}`, then `Startup`, in `assembly`.
    pub fn locate(&self, assembly: &str, environment: &str) -> Result<StartupType, StartupError> {
        let types = self
            .assemblies
            .get(&assembly.to_ascii_lowercase())
            .ok_or_else(|| StartupError::AssemblyNotFound {
                assembly: assembly.to_string(),
            })?;

        let preferred = format!("Startup{environment}");
        let fallback = "Startup".to_string();
        let found = [preferred.as_str(), fallback.as_str()]
            .into_iter()
            .find_map(|candidate| {
                types
                    .iter()
                    .find(|t| t.name().eq_ignore_ascii_case(candidate))
                    .cloned()
            })
            .ok_or_else(|| StartupError::TypeNotFound {
                assembly: assembly.to_string(),
                preferred: preferred.clone(),
                fallback: fallback.clone(),
            });
        found
    }
}

/// Startup loader capability registered in hosting services.
#[derive(Debug, Clone, Default)]
pub struct StartupLoader {
    registry: StartupRegistry,
}

impl StartupLoader {
    pub fn new(registry: StartupRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StartupRegistry {
        &self.registry
    }

    pub fn load(&self, assembly: &str, environment: &str) -> Result<StartupType, StartupError> {
        let startup = self.registry.locate(assembly, environment)?;
        tracing::debug!(assembly, startup = startup.name(), "Startup type located");
        Ok(startup)
    }
}

/// How the application is configured.
#[derive(Clone)]
pub enum StartupDescriptor {
    /// A bare configure callback; no service configuration.
    Configure(ConfigureFn),
    Type(StartupType),
    /// Looked up in the [`StartupLoader`] by name.
    Assembly(String),
}

impl fmt::Debug for StartupDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupDescriptor::Configure(_) => f.write_str("Configure(<callback>)"),
            StartupDescriptor::Type(t) => f.debug_tuple("Type").field(&t.name()).finish(),
            StartupDescriptor::Assembly(a) => f.debug_tuple("Assembly").field(a).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::services::ServiceRegistry;

    struct Startup;

    impl super::Startup for Startup {
        fn create(_context: &StartupContext) -> Result<Self, StartupError> {
            Ok(Startup)
        }

        fn hooks(self: Arc<Self>, hooks: &mut StartupHooks) {
            hooks.configure(|_| Ok(()));
        }
    }

    struct StartupDevelopment;

    impl super::Startup for StartupDevelopment {
        fn create(_context: &StartupContext) -> Result<Self, StartupError> {
            Ok(StartupDevelopment)
        }

        fn hooks(self: Arc<Self>, _hooks: &mut StartupHooks) {}
    }

    fn context() -> StartupContext {
        StartupContext::new(
            Arc::new(HostingEnvironment::new()),
            ServiceRegistry::new().build(),
        )
    }

    #[test]
    fn environment_specific_hook_wins() {
        let mut hooks = StartupHooks::new();
        hooks.configure(|_| Ok(()));
        hooks.configure_for("Development", |_| Ok(()));

        let (name, _) = hooks.select_configure("development", "Shop").unwrap();
        assert_eq!(name, "configure_development");

        let (name, _) = hooks.select_configure("Staging", "Shop").unwrap();
        assert_eq!(name, "configure");
    }

    #[test]
    fn missing_configure_names_both_hooks_and_type() {
        let hooks = StartupHooks::new();
        let err = match hooks.select_configure("Staging", "Shop") {
            Err(err) => err,
            Ok(_) => panic!("expected missing hook"),
        };
        let message = err.to_string();
        assert!(message.contains("configure_staging"));
        assert!(message.contains("`configure`"));
        assert!(message.contains("Shop"));
    }

    #[test]
    fn duplicate_hooks_are_ambiguous() {
        let mut hooks = StartupHooks::new();
        hooks.configure_services(|_| Ok(()));
        hooks.configure_services(|_| Ok(()));
        assert!(matches!(
            hooks.select_configure_services("Production", "Shop"),
            Err(StartupError::AmbiguousMethod { .. })
        ));
    }

    #[test]
    fn configure_services_is_optional() {
        let hooks = StartupHooks::new();
        assert!(hooks
            .select_configure_services("Production", "Shop")
            .unwrap()
            .is_none());
    }

    #[test]
    fn registry_prefers_environment_type() {
        let mut registry = StartupRegistry::new();
        registry
            .register_type::<Startup>("Shop")
            .register_type::<StartupDevelopment>("Shop");

        assert_eq!(registry.locate("shop", "Development").unwrap().name(), "StartupDevelopment");
        assert_eq!(registry.locate("shop", "Production").unwrap().name(), "Startup");
        assert!(matches!(
            registry.locate("billing", "Production"),
            Err(StartupError::AssemblyNotFound { .. })
        ));
    }

    #[test]
    fn type_not_found_lists_candidates() {
        let mut registry = StartupRegistry::new();
        registry.register("shop", StartupType::from_fn("Other", |_| Ok(StartupHooks::new())));
        let err = registry.locate("shop", "Staging").unwrap_err();
        assert!(err.to_string().contains("StartupStaging"));
    }

    #[test]
    fn construction_errors_are_wrapped() {
        struct Broken;
        impl super::Startup for Broken {
            fn create(context: &StartupContext) -> Result<Self, StartupError> {
                context.resolve::<String>()?;
                Ok(Broken)
            }
            fn hooks(self: Arc<Self>, _hooks: &mut StartupHooks) {}
        }

        let err = StartupType::of::<Broken>().activate(&context()).unwrap_err();
        match err {
            StartupError::Construction { type_name, .. } => assert_eq!(type_name, "Broken"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
