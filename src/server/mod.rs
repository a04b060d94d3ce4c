//! Server binding subsystem.
//!
//! # Data Flow
//! ```text
//! ServerBinding::Factory(instance) ─┐
//! ServerBinding::Location(name) → ServerLoader::load ─┤
//!                                                     → ServerFactory::create(configuration)
//!                                                     → Server::start(handler)
//!                                                     → Server::shutdown
//! ```
//!
//! # Design Decisions
//! - The host hands servers a [`ServerHandler`] over buffered `http` types;
//!   servers own the wire protocol and map handler errors to 500
//! - A server starts once; `shutdown` is idempotent and waits for its tasks
//! - Server names are case-insensitive

pub mod axum_server;
pub mod hyper_server;

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::config::Configuration;
use crate::http::pipeline::PipelineError;
use crate::net::ListenerError;

pub use axum_server::{AxumServer, AxumServerFactory};
pub use hyper_server::{HyperServer, HyperServerFactory};

/// Largest request body the servers buffer.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub type ServerHandler = Arc<
    dyn Fn(http::Request<Bytes>) -> BoxFuture<'static, Result<http::Response<Bytes>, PipelineError>>
        + Send
        + Sync,
>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("no server named `{name}` (available: {available})")]
    NotFound { name: String, available: String },
}

/// Urls a server was configured with and the addresses it actually bound.
#[derive(Debug, Default)]
pub struct ServerFeatures {
    urls: Vec<String>,
    addresses: RwLock<Vec<SocketAddr>>,
}

impl ServerFeatures {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            addresses: RwLock::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Bound addresses; empty until the server started.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_addresses(&self, addresses: Vec<SocketAddr>) {
        *self
            .addresses
            .write()
            .unwrap_or_else(PoisonError::into_inner) = addresses;
    }
}

#[async_trait]
pub trait Server: Send + Sync {
    fn features(&self) -> &ServerFeatures;

    async fn start(&self, handler: ServerHandler) -> Result<(), ServerError>;

    async fn shutdown(&self);
}

pub trait ServerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, configuration: &Configuration) -> Result<Arc<dyn Server>, ServerError>;
}

/// Server location resolved by the host.
#[derive(Clone)]
pub enum ServerBinding {
    Factory(Arc<dyn ServerFactory>),
    Location(String),
}

impl fmt::Debug for ServerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerBinding::Factory(factory) => f.debug_tuple("Factory").field(&factory.name()).finish(),
            ServerBinding::Location(name) => f.debug_tuple("Location").field(name).finish(),
        }
    }
}

/// Server name → factory.
#[derive(Clone, Default)]
pub struct ServerLoader {
    factories: BTreeMap<String, Arc<dyn ServerFactory>>,
}

impl ServerLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with the built-in `axum` and `hyper` servers.
    pub fn with_defaults() -> Self {
        let mut loader = Self::new();
        loader
            .register(Arc::new(AxumServerFactory))
            .register(Arc::new(HyperServerFactory));
        loader
    }

    pub fn register(&mut self, factory: Arc<dyn ServerFactory>) -> &mut Self {
        self.factories
            .insert(factory.name().to_ascii_lowercase(), factory);
        self
    }

    pub fn load(&self, name: &str) -> Result<Arc<dyn ServerFactory>, ServerError> {
        self.factories
            .get(&name.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ServerError::NotFound {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl fmt::Debug for ServerLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerLoader")
            .field("servers", &self.names())
            .finish()
    }
}

/// Response sent when the handler fails.
pub(crate) fn internal_error() -> http::Response<Bytes> {
    let mut response = http::Response::new(Bytes::from_static(b"Internal Server Error"));
    *response.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Response sent when the request body cannot be read.
pub(crate) fn bad_request() -> http::Response<Bytes> {
    let mut response = http::Response::new(Bytes::from_static(b"Failed to read request body"));
    *response.status_mut() = http::StatusCode::BAD_REQUEST;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_is_case_insensitive() {
        let loader = ServerLoader::with_defaults();
        assert_eq!(loader.load("Axum").unwrap().name(), "axum");
        assert_eq!(loader.load("HYPER").unwrap().name(), "hyper");
    }

    #[test]
    fn unknown_server_lists_available() {
        let err = ServerLoader::with_defaults().load("iis").err().unwrap();
        assert_eq!(
            err.to_string(),
            "no server named `iis` (available: axum, hyper)"
        );
    }
}
