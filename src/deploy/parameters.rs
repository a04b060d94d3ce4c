//! Deployment inputs and outputs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::schema::DEFAULT_ENVIRONMENT;
use crate::lifecycle::ShutdownListener;

/// Runtime launched by default: the host binary.
pub const DEFAULT_RUNTIME: &str = "app-host";
pub const DEFAULT_COMMAND: &str = "run";
pub const DEFAULT_GRACEFUL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Axum,
    Hyper,
}

impl ServerType {
    /// Name passed to the host's `--server` argument.
    pub fn id(&self) -> &'static str {
        match self {
            ServerType::Axum => "axum",
            ServerType::Hyper => "hyper",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ServerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axum" => Ok(ServerType::Axum),
            "hyper" => Ok(ServerType::Hyper),
            other => Err(format!("unknown server type `{other}` (expected axum or hyper)")),
        }
    }
}

pub type CleanupFn = Arc<dyn Fn(&DeploymentParameters) + Send + Sync>;

/// What to deploy and how.
#[derive(Clone)]
pub struct DeploymentParameters {
    pub application_path: PathBuf,
    pub server_type: ServerType,
    pub environment_name: String,
    /// Fixed base URI; a free localhost port is picked when absent.
    pub application_base_uri: Option<String>,
    pub command: String,
    pub runtime: PathBuf,
    pub environment_variables: BTreeMap<String, String>,
    pub publish_application_before_deployment: bool,
    pub preserve_published_application: bool,
    pub graceful_shutdown_timeout: Duration,
    /// Runs once at the end of `dispose`.
    pub user_additional_cleanup: Option<CleanupFn>,
}

impl DeploymentParameters {
    pub fn new(application_path: impl Into<PathBuf>, server_type: ServerType) -> Self {
        Self {
            application_path: application_path.into(),
            server_type,
            environment_name: DEFAULT_ENVIRONMENT.to_string(),
            application_base_uri: None,
            command: DEFAULT_COMMAND.to_string(),
            runtime: PathBuf::from(DEFAULT_RUNTIME),
            environment_variables: BTreeMap::new(),
            publish_application_before_deployment: false,
            preserve_published_application: false,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_TIMEOUT,
            user_additional_cleanup: None,
        }
    }

    pub fn with_environment(mut self, name: impl Into<String>) -> Self {
        self.environment_name = name.into();
        self
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.application_base_uri = Some(uri.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_runtime(mut self, runtime: impl AsRef<Path>) -> Self {
        self.runtime = runtime.as_ref().to_path_buf();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(key.into(), value.into());
        self
    }

    pub fn with_publish(mut self, publish: bool) -> Self {
        self.publish_application_before_deployment = publish;
        self
    }

    pub fn with_preserve_published(mut self, preserve: bool) -> Self {
        self.preserve_published_application = preserve;
        self
    }

    pub fn with_graceful_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn(&DeploymentParameters) + Send + Sync + 'static,
    {
        self.user_additional_cleanup = Some(Arc::new(cleanup));
        self
    }

    /// Name used in logs: the application directory name.
    pub fn application_name(&self) -> String {
        self.application_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.runtime.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for DeploymentParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentParameters")
            .field("application_path", &self.application_path)
            .field("server_type", &self.server_type)
            .field("environment_name", &self.environment_name)
            .field("application_base_uri", &self.application_base_uri)
            .field("command", &self.command)
            .field("runtime", &self.runtime)
            .field("environment_variables", &self.environment_variables)
            .field("publish", &self.publish_application_before_deployment)
            .field("preserve_published", &self.preserve_published_application)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .field("user_additional_cleanup", &self.user_additional_cleanup.is_some())
            .finish()
    }
}

/// Where an application was deployed.
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    /// Directory the host was launched from (the published output when
    /// publishing was requested).
    pub deployment_root: PathBuf,
    pub parameters: DeploymentParameters,
    pub application_base_uri: String,
    /// Fires once when the host process exits.
    pub host_shutdown: ShutdownListener,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_type_names_round_trip() {
        assert_eq!(ServerType::Axum.id(), "axum");
        assert_eq!("HYPER".parse::<ServerType>(), Ok(ServerType::Hyper));
        assert!("iis".parse::<ServerType>().is_err());
        assert_eq!(serde_json::to_string(&ServerType::Hyper).unwrap(), "\"hyper\"");
    }

    #[test]
    fn defaults() {
        let params = DeploymentParameters::new("/srv/apps/shop", ServerType::Axum);
        assert_eq!(params.command, "run");
        assert_eq!(params.environment_name, DEFAULT_ENVIRONMENT);
        assert_eq!(params.runtime, PathBuf::from("app-host"));
        assert_eq!(params.application_name(), "shop");
        assert!(!params.publish_application_before_deployment);
    }
}
