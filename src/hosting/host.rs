//! Built host: server start, request dispatch and ordered disposal.
//!
//! # Responsibilities
//! - Resolve the server binding and start the server
//! - Turn raw requests into contexts, run the pipeline, record metrics and
//!   diagnostics
//! - Dispose in order: stopping → server → application services → hosting
//!   services → stopped
//!
//! # Design Decisions
//! - `start` runs once; a second call or a call after `dispose` is an error
//! - `dispose` is idempotent and safe on a host that never started
//! - Pipeline errors and panics are logged here, then reported to the
//!   server which answers 500

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::header::HeaderValue;
use tracing::Instrument;

use crate::config::{Configuration, HostOptions};
use crate::hosting::diagnostics::{DiagnosticEvent, DiagnosticSource};
use crate::hosting::environment::HostingEnvironment;
use crate::hosting::error::HostError;
use crate::hosting::services::{panic_message, ServiceProvider};
use crate::hosting::startup::StartupError;
use crate::http::context::{RequestContextFactory, X_REQUEST_ID};
use crate::http::pipeline::{PipelineError, RequestDelegate};
use crate::lifecycle::{signals, ApplicationLifetime};
use crate::observability::{metrics, Logger};
use crate::server::{Server, ServerBinding, ServerHandler, ServerLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Unbuilt,
    ServicesBuilt,
    StartupResolved,
    PipelineBuilt,
    Bound,
    Started,
    Disposed,
}

/// Everything `build` hands over to the host.
pub(crate) struct HostParts {
    pub options: Arc<HostOptions>,
    pub configuration: Arc<Configuration>,
    pub environment: Arc<HostingEnvironment>,
    pub hosting_services: ServiceProvider,
    pub services: ServiceProvider,
    pub pipeline: RequestDelegate,
    pub server_binding: Option<ServerBinding>,
    pub lifetime: Arc<ApplicationLifetime>,
    pub diagnostics: Arc<DiagnosticSource>,
    pub logger: Logger,
    pub startup_error: Option<Arc<StartupError>>,
}

pub struct Host {
    options: Arc<HostOptions>,
    configuration: Arc<Configuration>,
    environment: Arc<HostingEnvironment>,
    hosting_services: ServiceProvider,
    services: ServiceProvider,
    pipeline: RequestDelegate,
    server_binding: Option<ServerBinding>,
    state: Mutex<HostState>,
    server: Mutex<Option<Arc<dyn Server>>>,
    lifetime: Arc<ApplicationLifetime>,
    diagnostics: Arc<DiagnosticSource>,
    logger: Logger,
    startup_error: Option<Arc<StartupError>>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("environment", &self.environment.environment_name())
            .field("state", &self.state())
            .field("server_binding", &self.server_binding)
            .field("startup_error", &self.startup_error.is_some())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Host {
    pub(crate) fn new(parts: HostParts) -> Self {
        Self {
            options: parts.options,
            configuration: parts.configuration,
            environment: parts.environment,
            hosting_services: parts.hosting_services,
            services: parts.services,
            pipeline: parts.pipeline,
            server_binding: parts.server_binding,
            state: Mutex::new(HostState::PipelineBuilt),
            server: Mutex::new(None),
            lifetime: parts.lifetime,
            diagnostics: parts.diagnostics,
            logger: parts.logger,
            startup_error: parts.startup_error,
        }
    }

    /// Create and start the server.
    pub async fn start(&self) -> Result<(), HostError> {
        {
            let mut state = lock(&self.state);
            match *state {
                HostState::Disposed => return Err(HostError::Disposed),
                HostState::Bound | HostState::Started => return Err(HostError::AlreadyStarted),
                _ => *state = HostState::Bound,
            }
        }

        self.diagnostics.emit(DiagnosticEvent::HostStarting);

        let server = match self.start_server().await {
            Ok(server) => server,
            Err(err) => {
                let mut state = lock(&self.state);
                if *state == HostState::Bound {
                    *state = HostState::PipelineBuilt;
                }
                tracing::error!(error = %err, "Host failed to start");
                return Err(err);
            }
        };

        // `dispose` may have run while the server was binding.
        let disposed = {
            let mut state = lock(&self.state);
            if *state == HostState::Bound {
                *state = HostState::Started;
                *lock(&self.server) = Some(Arc::clone(&server));
                false
            } else {
                true
            }
        };
        if disposed {
            tracing::warn!("Host disposed while starting, stopping server");
            server.shutdown().await;
            return Err(HostError::Disposed);
        }
        self.lifetime.notify_started();

        let addresses = self.server_addresses();
        for address in &addresses {
            self.logger.info(&format!("Now listening on: http://{address}"));
        }
        self.logger.info(&format!(
            "Hosting environment: {}",
            self.environment.environment_name()
        ));
        self.logger.info(&format!(
            "Content root path: {}",
            self.environment.content_root().display()
        ));
        self.diagnostics
            .emit(DiagnosticEvent::HostStarted { addresses });
        Ok(())
    }

    async fn start_server(&self) -> Result<Arc<dyn Server>, HostError> {
        let factory = match &self.server_binding {
            Some(ServerBinding::Factory(factory)) => Arc::clone(factory),
            Some(ServerBinding::Location(name)) => {
                self.hosting_services.resolve::<ServerLoader>()?.load(name)?
            }
            None => return Err(HostError::ServerNotFound),
        };

        let server = factory.create(&self.configuration)?;
        let contexts = self.hosting_services.resolve::<RequestContextFactory>()?;
        tracing::debug!(server = factory.name(), "Starting server");
        if let Err(err) = server.start(self.request_handler(contexts)).await {
            server.shutdown().await;
            return Err(err.into());
        }
        Ok(server)
    }

    fn request_handler(&self, contexts: Arc<RequestContextFactory>) -> ServerHandler {
        let pipeline = Arc::clone(&self.pipeline);
        let diagnostics = Arc::clone(&self.diagnostics);

        Arc::new(
            move |request: http::Request<Bytes>| -> BoxFuture<'static, Result<http::Response<Bytes>, PipelineError>> {
                let pipeline = Arc::clone(&pipeline);
                let diagnostics = Arc::clone(&diagnostics);
                let ctx = contexts.create(request);

                Box::pin(async move {
                    let started = Instant::now();
                    let trace_identifier = ctx.trace_identifier.clone();
                    let span = tracing::info_span!(
                        "request",
                        trace_id = %trace_identifier,
                        method = %ctx.method,
                        path = %ctx.path(),
                    );

                    if diagnostics.is_enabled() {
                        diagnostics.emit(DiagnosticEvent::BeginRequest {
                            trace_identifier: trace_identifier.clone(),
                            method: ctx.method.to_string(),
                            path: ctx.path().to_string(),
                        });
                    }

                    let result = AssertUnwindSafe(async move { pipeline(ctx).await })
                        .catch_unwind()
                        .instrument(span)
                        .await
                        .unwrap_or_else(|panic| {
                            Err(PipelineError::handler(format!(
                                "request handler panicked: {}",
                                panic_message(panic.as_ref())
                            )))
                        });

                    let status = match &result {
                        Ok(response) => response.status.as_u16(),
                        Err(err) => {
                            tracing::error!(
                                trace_id = %trace_identifier,
                                error = %err,
                                details = %render_chain(err),
                                "Unhandled error while processing request"
                            );
                            diagnostics.emit(DiagnosticEvent::UnhandledException {
                                trace_identifier: trace_identifier.clone(),
                                error: err.to_string(),
                            });
                            500
                        }
                    };

                    metrics::record_request(status, started);
                    diagnostics.emit(DiagnosticEvent::EndRequest {
                        trace_identifier: trace_identifier.clone(),
                        status,
                        elapsed: started.elapsed(),
                    });

                    result.map(|response| {
                        let mut response = response.into_http();
                        if !response.headers().contains_key(X_REQUEST_ID) {
                            if let Ok(value) = HeaderValue::from_str(&trace_identifier) {
                                response.headers_mut().insert(X_REQUEST_ID, value);
                            }
                        }
                        response
                    })
                })
            },
        )
    }

    /// Stop the server and dispose services. Only the first call does work.
    pub async fn dispose(&self) {
        {
            let mut state = lock(&self.state);
            if *state == HostState::Disposed {
                return;
            }
            *state = HostState::Disposed;
        }

        self.logger.info("Application is shutting down...");
        self.lifetime.notify_stopping();

        let server = lock(&self.server).take();
        if let Some(server) = server {
            server.shutdown().await;
        }

        self.services.dispose();
        self.hosting_services.dispose();

        self.lifetime.notify_stopped();
        self.diagnostics.emit(DiagnosticEvent::HostStopped);
        tracing::info!("Host stopped");
    }

    /// Start, wait for Ctrl-C/SIGTERM or `stop_application`, then dispose.
    pub async fn run(&self) -> Result<(), HostError> {
        if let Err(err) = self.start().await {
            self.dispose().await;
            return Err(err);
        }

        self.logger.info("Application started. Press Ctrl+C to shut down.");
        let stopping = self.lifetime.application_stopping();
        tokio::select! {
            () = signals::wait_for_shutdown() => {}
            () = stopping.cancelled() => {}
        }

        self.dispose().await;
        Ok(())
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn environment(&self) -> &HostingEnvironment {
        &self.environment
    }

    /// Application services (the hosting services when startup failed).
    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn hosting_services(&self) -> &ServiceProvider {
        &self.hosting_services
    }

    pub fn lifetime(&self) -> &ApplicationLifetime {
        &self.lifetime
    }

    pub fn diagnostics(&self) -> &DiagnosticSource {
        &self.diagnostics
    }

    /// The captured startup error, if the host is serving the error page.
    pub fn startup_error(&self) -> Option<&StartupError> {
        self.startup_error.as_deref()
    }

    pub fn state(&self) -> HostState {
        *lock(&self.state)
    }

    pub fn server_addresses(&self) -> Vec<SocketAddr> {
        lock(&self.server)
            .as_ref()
            .map(|server| server.features().addresses())
            .unwrap_or_default()
    }

    /// The built request pipeline, for in-process execution.
    pub fn pipeline(&self) -> RequestDelegate {
        Arc::clone(&self.pipeline)
    }
}

fn render_chain(err: &PipelineError) -> String {
    let mut text = String::new();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if !text.is_empty() {
            text.push_str(": ");
        }
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
