//! Publish step collaborator.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::deploy::parameters::DeploymentParameters;
use crate::BoxError;

/// Produces the deployable output for an application.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish the application and return the directory holding the output.
    async fn publish(&self, parameters: &DeploymentParameters) -> Result<PathBuf, BoxError>;
}
