//! Axum-backed server.
//!
//! # Responsibilities
//! - Bind every configured url
//! - Route all requests through a fallback service into the host handler
//! - Wire up request tracing (`TraceLayer`)
//! - Serve with graceful shutdown on a tracked task per listener

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

use crate::config::schema::configured_urls;
use crate::config::Configuration;
use crate::net::bind_urls;
use crate::server::{
    bad_request, internal_error, Server, ServerError, ServerFactory, ServerFeatures, ServerHandler,
    MAX_BODY_BYTES,
};

pub struct AxumServer {
    features: ServerFeatures,
    started: AtomicBool,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl AxumServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            features: ServerFeatures::new(urls),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    fn router(handler: ServerHandler) -> Router {
        Router::new()
            .fallback_service(tower::service_fn(move |request: Request| {
                let handler = Arc::clone(&handler);
                async move {
                    let (parts, body) = request.into_parts();
                    let response = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                        Ok(bytes) => match handler(http::Request::from_parts(parts, bytes)).await {
                            Ok(response) => response,
                            Err(_) => internal_error(),
                        },
                        Err(e) => {
                            tracing::debug!(error = %e, "Failed to read request body");
                            bad_request()
                        }
                    };
                    Ok::<_, Infallible>(response.map(Body::from))
                }
            }))
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl Server for AxumServer {
    fn features(&self) -> &ServerFeatures {
        &self.features
    }

    async fn start(&self, handler: ServerHandler) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let listeners = bind_urls(self.features.urls()).await?;
        let mut addresses = Vec::with_capacity(listeners.len());

        for listener in listeners {
            let address = listener.local_addr().ok();
            addresses.extend(address);

            let app = Self::router(Arc::clone(&handler));
            let token = self.shutdown_token.clone();
            self.task_tracker.spawn(async move {
                let result = axum::serve(listener, app.into_make_service())
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await;
                match result {
                    Ok(()) => tracing::debug!(address = ?address, "Axum listener stopped"),
                    Err(e) => tracing::error!(address = ?address, error = %e, "Axum listener failed"),
                }
            });
        }

        self.task_tracker.close();
        tracing::info!(addresses = ?addresses, "Axum server started");
        self.features.set_addresses(addresses);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        tracing::info!("Axum server stopped");
    }
}

/// Factory registered as `axum`.
#[derive(Debug, Default)]
pub struct AxumServerFactory;

impl ServerFactory for AxumServerFactory {
    fn name(&self) -> &str {
        "axum"
    }

    fn create(&self, configuration: &Configuration) -> Result<Arc<dyn Server>, ServerError> {
        Ok(Arc::new(AxumServer::new(configured_urls(configuration))))
    }
}
