use std::path::PathBuf;

use thiserror::Error;

use crate::BoxError;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("publishing was requested but no publisher is configured")]
    PublisherMissing,

    #[error("failed to publish the application")]
    Publish(#[source] BoxError),

    #[error("failed to launch `{}`", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("application `{name}` exited immediately (exit code: {})", format_code(.code))]
    ExitedImmediately { name: String, code: Option<i32> },

    #[error("application has already been deployed")]
    AlreadyDeployed,

    #[error("deployer has been disposed")]
    Disposed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |code| code.to_string())
}
