//! Request pipeline contract.
//!
//! # Data Flow
//! ```text
//! configure hook
//!     → ApplicationBuilder::use_middleware (outermost first)
//!     → ApplicationBuilder::run (terminal handler, default 404)
//!     → build → RequestDelegate
//! ```
//!
//! # Design Decisions
//! - A middleware is a function from the next delegate to a new delegate
//! - Startup filters wrap the configure hook, so their middleware lands
//!   ahead of anything the application adds

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::StatusCode;
use thiserror::Error;

use crate::hosting::services::{ServiceError, ServiceProvider};
use crate::hosting::startup::ConfigureFn;
use crate::http::context::{RequestContext, Response};
use crate::BoxError;

pub type ResponseFuture = BoxFuture<'static, Result<Response, PipelineError>>;

pub type RequestDelegate = Arc<dyn Fn(RequestContext) -> ResponseFuture + Send + Sync>;

type Middleware = Arc<dyn Fn(RequestDelegate) -> RequestDelegate + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request services unavailable")]
    Services(#[from] ServiceError),

    #[error("request handler failed")]
    Handler(#[source] BoxError),
}

impl PipelineError {
    pub fn handler(err: impl Into<BoxError>) -> Self {
        PipelineError::Handler(err.into())
    }
}

/// Wrap an async function as a [`RequestDelegate`].
pub fn delegate<F, Fut>(handler: F) -> RequestDelegate
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, PipelineError>> + Send + 'static,
{
    Arc::new(move |ctx: RequestContext| -> ResponseFuture { Box::pin(handler(ctx)) })
}

/// Collects middleware and the terminal handler during `configure`.
pub struct ApplicationBuilder {
    services: ServiceProvider,
    middleware: Vec<Middleware>,
    terminal: Option<RequestDelegate>,
}

impl ApplicationBuilder {
    pub fn new(services: ServiceProvider) -> Self {
        Self {
            services,
            middleware: Vec::new(),
            terminal: None,
        }
    }

    /// Application root services.
    pub fn application_services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn use_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(RequestDelegate) -> RequestDelegate + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Set the terminal handler. A later call replaces the previous one.
    pub fn run<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, PipelineError>> + Send + 'static,
    {
        self.terminal = Some(delegate(handler));
        self
    }

    pub fn build(&self) -> RequestDelegate {
        let terminal = self.terminal.clone().unwrap_or_else(not_found);
        self.middleware
            .iter()
            .rev()
            .fold(terminal, |next, middleware| middleware(next))
    }
}

fn not_found() -> RequestDelegate {
    delegate(|_ctx| async { Ok(Response::text(StatusCode::NOT_FOUND, "Not Found")) })
}

/// Wraps the application's configure hook.
pub trait StartupFilter: Send + Sync {
    fn configure(&self, next: ConfigureFn) -> ConfigureFn;
}

/// Gives every request its own service scope and disposes it afterwards.
#[derive(Debug, Default)]
pub struct RequestServicesFilter;

impl StartupFilter for RequestServicesFilter {
    fn configure(&self, next: ConfigureFn) -> ConfigureFn {
        Arc::new(move |app: &mut ApplicationBuilder| {
            let root = app.application_services().clone();
            app.use_middleware(move |inner: RequestDelegate| -> RequestDelegate {
                let root = root.clone();
                delegate(move |mut ctx: RequestContext| {
                    let scope = ScopeGuard(root.create_scope());
                    ctx.request_services = Some(scope.0.clone());
                    let inner = Arc::clone(&inner);
                    async move {
                        let _scope = scope;
                        inner(ctx).await
                    }
                })
            });
            next(app)
        })
    }
}

/// Disposes the request scope when the request future finishes, panics or
/// is dropped by the server.
struct ScopeGuard(ServiceProvider);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.dispose();
    }
}
