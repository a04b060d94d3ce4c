//! TCP listener binding for server urls.
//!
//! # Responsibilities
//! - Resolve `http://host:port` urls to socket addresses
//! - Bind one listener per configured url
//! - Allocate free loopback ports for self-hosted deployments

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use thiserror::Error;
use tokio::net::TcpListener;
use url::Url;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to resolve `{url}`")]
    Resolve {
        url: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolve a server url to the first socket address it names.
pub async fn resolve_url(raw: &str) -> Result<SocketAddr, ListenerError> {
    let invalid = |reason: &str| ListenerError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;

    let mut addrs = tokio::net::lookup_host((host.trim_matches(|c| c == '[' || c == ']'), port))
        .await
        .map_err(|source| ListenerError::Resolve {
            url: raw.to_string(),
            source,
        })?;

    addrs.next().ok_or_else(|| ListenerError::Resolve {
        url: raw.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
    })
}

/// Bind a listener for every url, in order.
pub async fn bind_urls(urls: &[String]) -> Result<Vec<TcpListener>, ListenerError> {
    let mut listeners = Vec::with_capacity(urls.len());
    for url in urls {
        let address = resolve_url(url).await?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind { address, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { address, source })?;

        tracing::info!(url = %url, address = %local_addr, "Listener bound");
        listeners.push(listener);
    }
    Ok(listeners)
}

/// Ask the OS for a currently free loopback port.
///
/// The port is released before returning, so another process may grab it
/// first; callers treat a later bind failure as a launch failure.
pub fn free_port() -> io::Result<u16> {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let listeners = bind_urls(&["http://127.0.0.1:0".to_string()]).await.unwrap();
        assert_eq!(listeners.len(), 1);
        assert_ne!(listeners[0].local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn known_default_port() {
        let addr = resolve_url("http://127.0.0.1").await.unwrap();
        assert_eq!(addr.port(), 80);
    }

    #[tokio::test]
    async fn rejects_url_without_host() {
        assert!(matches!(
            resolve_url("not a url").await,
            Err(ListenerError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_port().unwrap(), 0);
    }
}
