//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! environment variables (APPHOST_*)  → base
//! config files / embedder supplied    → external (use_configuration, layered)
//! use_setting / typed builder helpers → settings
//!     → settings::merge (settings > external > base)
//!     → schema::HostOptions (immutable snapshot)
//!     → validation.rs (semantic checks)
//!     → shared via Arc with the host and its services
//! ```
//!
//! # Design Decisions
//! - Keys are case-insensitive; unknown keys pass through untouched
//! - Options are derived once per build and never mutated
//! - Validation separates parsing (schema) from semantic checks

pub mod loader;
pub mod schema;
pub mod settings;
pub mod validation;

pub use loader::{from_args, from_env, load_config, ConfigError};
pub use schema::{keys, HostOptions, ENV_PREFIX};
pub use settings::{merge, Configuration};
pub use validation::{validate_options, ValidationError};
