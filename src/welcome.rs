//! Built-in application served by the `app-host` binary.
//!
//! Registered under the `app-host` assembly as `Startup`, so a host built
//! with `startup = "app-host"` finds it by convention.

use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::{json, Map, Value};

use crate::config::Configuration;
use crate::hosting::environment::HostingEnvironment;
use crate::hosting::startup::{
    Startup as StartupLogic, StartupContext, StartupError, StartupHooks, StartupRegistry,
};
use crate::http::context::Response;
use crate::lifecycle::ApplicationLifetime;

pub const ASSEMBLY: &str = "app-host";

/// Startup registry containing the built-in application.
pub fn registry() -> StartupRegistry {
    let mut registry = StartupRegistry::new();
    registry.register_type::<Startup>(ASSEMBLY);
    registry
}

pub struct Startup {
    application: String,
    environment: String,
    content_root: String,
    configuration: Arc<Configuration>,
}

impl StartupLogic for Startup {
    fn create(context: &StartupContext) -> Result<Self, StartupError> {
        let environment: Arc<HostingEnvironment> = context.resolve()?;
        Ok(Self {
            application: environment.application_name().to_string(),
            environment: environment.environment_name().to_string(),
            content_root: environment.content_root().display().to_string(),
            configuration: context.resolve()?,
        })
    }

    fn hooks(self: Arc<Self>, hooks: &mut StartupHooks) {
        let welcome = Arc::clone(&self);
        hooks.configure(move |app| {
            let welcome = Arc::clone(&welcome);
            app.run(move |ctx| {
                let body = welcome.describe(ctx.path(), false);
                async move { Ok(Response::json(StatusCode::OK, &body)) }
            });
            Ok(())
        });

        // Development also exposes the effective settings and a stop endpoint.
        hooks.configure_for("development", move |app| {
            let lifetime = app.application_services().resolve::<ApplicationLifetime>()?;
            let welcome = Arc::clone(&self);
            app.run(move |ctx| {
                let response = if ctx.method == Method::POST && ctx.path() == "/shutdown" {
                    lifetime.stop_application();
                    Response::text(StatusCode::ACCEPTED, "Shutting down")
                } else {
                    Response::json(StatusCode::OK, &welcome.describe(ctx.path(), true))
                };
                async move { Ok(response) }
            });
            Ok(())
        });
    }
}

impl Startup {
    fn describe(&self, path: &str, include_settings: bool) -> Value {
        let mut body = json!({
            "message": "Welcome to app-host",
            "application": self.application,
            "environment": self.environment,
            "content_root": self.content_root,
            "path": path,
        });
        if include_settings {
            let settings: Map<String, Value> = self
                .configuration
                .iter()
                .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
                .collect();
            body["settings"] = Value::Object(settings);
        }
        body
    }
}
