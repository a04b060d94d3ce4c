//! Hyper-backed server with its own accept loop.
//!
//! HTTP/1 and HTTP/2 are negotiated per connection (`hyper_util` auto
//! builder). On shutdown the accept loop stops and every live connection is
//! asked to finish gracefully.

use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::schema::configured_urls;
use crate::config::Configuration;
use crate::net::{bind_urls, ConnectionTracker};
use crate::server::{
    bad_request, internal_error, Server, ServerError, ServerFactory, ServerFeatures, ServerHandler,
    MAX_BODY_BYTES,
};

/// Pause after an accept error that is not tied to one connection, such as
/// running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connection-level accept errors are retried at once; anything else backs
/// off first.
fn accept_retry_delay(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}

pub struct HyperServer {
    features: ServerFeatures,
    started: AtomicBool,
    connections: ConnectionTracker,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl HyperServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            features: ServerFeatures::new(urls),
            started: AtomicBool::new(false),
            connections: ConnectionTracker::new(),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    fn accept_loop(&self, listener: TcpListener, handler: ServerHandler) {
        let token = self.shutdown_token.clone();
        let tasks = self.task_tracker.clone();
        let connections = self.connections.clone();

        self.task_tracker.spawn(async move {
            loop {
                let (stream, peer) = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                            if let Some(delay) = accept_retry_delay(&e) {
                                tokio::select! {
                                    () = tokio::time::sleep(delay) => {}
                                    () = token.cancelled() => break,
                                }
                            }
                            continue;
                        }
                    },
                    () = token.cancelled() => break,
                };

                let guard = connections.track();
                tracing::debug!(peer_addr = %peer, connection_id = %guard.id(), "Connection accepted");

                let handler = Arc::clone(&handler);
                let token = token.clone();
                tasks.spawn(async move {
                    let _guard = guard;
                    let service = hyper::service::service_fn(move |request| {
                        let handler = Arc::clone(&handler);
                        async move { Ok::<_, Infallible>(handle(handler, request).await) }
                    });

                    let builder = auto::Builder::new(TokioExecutor::new());
                    let conn = builder.serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        () = token.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = result {
                        tracing::debug!(peer_addr = %peer, error = %e, "Connection ended with error");
                    }
                });
            }
        });
    }
}

async fn handle(handler: ServerHandler, request: hyper::Request<Incoming>) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let response = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            match handler(http::Request::from_parts(parts, collected.to_bytes())).await {
                Ok(response) => response,
                Err(_) => internal_error(),
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read request body");
            bad_request()
        }
    };
    response.map(Full::new)
}

#[async_trait]
impl Server for HyperServer {
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
            addresses.extend(listener.local_addr().ok());
            self.accept_loop(listener, Arc::clone(&handler));
        }

        tracing::info!(addresses = ?addresses, "Hyper server started");
        self.features.set_addresses(addresses);
        Ok(())
    }

    async fn shutdown(&self) {
        tracing::info!(
            active_connections = self.connections.active_count(),
            "Hyper server shutting down"
        );
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        self.connections.wait_idle().await;
        tracing::info!("Hyper server stopped");
    }
}

/// Factory registered as `hyper`.
#[derive(Debug, Default)]
pub struct HyperServerFactory;

impl ServerFactory for HyperServerFactory {
    fn name(&self) -> &str {
        "hyper"
    }

    fn create(&self, configuration: &Configuration) -> Result<Arc<dyn Server>, ServerError> {
        Ok(Arc::new(HyperServer::new(configured_urls(configuration))))
    }
}
