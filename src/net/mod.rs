//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! server.urls
//!     → listener.rs (resolve url, bind TcpListener)
//!     → server (axum / hyper accept loop)
//!     → connection.rs (hyper: per-connection guard, active count)
//! ```
//!
//! # Design Decisions
//! - One listener per configured url
//! - Each hyper connection is tracked for graceful shutdown

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{bind_urls, free_port, resolve_url, ListenerError};
