//! Host errors.

use thiserror::Error;

use crate::config::ValidationError;
use crate::hosting::environment::EnvironmentError;
use crate::hosting::services::ServiceError;
use crate::hosting::startup::StartupError;
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid host options: {}", format_validation(.0))]
    InvalidOptions(Vec<ValidationError>),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error("application startup failed: {0}")]
    Startup(#[source] StartupError),

    #[error("no server configured: register a server factory or set the `server` setting")]
    ServerNotFound,

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("host has already been started")]
    AlreadyStarted,

    #[error("host has been disposed")]
    Disposed,

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<StartupError> for HostError {
    fn from(err: StartupError) -> Self {
        HostError::Startup(err)
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
