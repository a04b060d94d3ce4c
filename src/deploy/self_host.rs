//! Out-of-process deployer for the host binary.
//!
//! # Data Flow
//! ```text
//! deploy:  Idle ─publish?─▶ Published ─▶ Launching ─▶ Running
//!            └─ runtime -p <root> <command> --server.urls <uri> --server <id>
//! dispose: ─▶ ShuttingDown ─▶ stop process ─▶ remove published output
//!            ─▶ user cleanup ─▶ Cleaned
//! ```
//!
//! # Design Decisions
//! - One process per deployer; a second `deploy` is an error
//! - `dispose` runs its steps once, whatever state `deploy` reached
//! - The host shutdown signal belongs to the deployer, callers only get
//!   listeners

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::config::{keys, ENV_PREFIX};
use crate::deploy::error::DeployError;
use crate::deploy::parameters::{DeploymentParameters, DeploymentResult};
use crate::deploy::process::{LaunchCommand, ProcessLauncher, SupervisedProcess, TokioLauncher};
use crate::deploy::publish::Publisher;
use crate::lifecycle::ShutdownSignal;
use crate::net::free_port;
use crate::observability::{Logger, LoggerFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployerState {
    Idle,
    Published,
    Launching,
    Running,
    ShuttingDown,
    Cleaned,
}

#[async_trait]
pub trait ApplicationDeployer: Send + Sync {
    async fn deploy(&self) -> Result<DeploymentResult, DeployError>;

    /// Stop the application and clean up. Safe to call more than once.
    async fn dispose(&self);
}

#[derive(Default)]
struct Resources {
    process: Option<SupervisedProcess>,
    published: Option<PathBuf>,
}

pub struct SelfHostDeployer {
    parameters: DeploymentParameters,
    launcher: Arc<dyn ProcessLauncher>,
    publisher: Option<Arc<dyn Publisher>>,
    logger_factory: LoggerFactory,
    logger: Logger,
    state: Mutex<DeployerState>,
    resources: tokio::sync::Mutex<Resources>,
    host_shutdown: ShutdownSignal,
}

impl SelfHostDeployer {
    pub fn new(parameters: DeploymentParameters) -> Self {
        let logger_factory = LoggerFactory::default();
        Self {
            parameters,
            launcher: Arc::new(TokioLauncher),
            publisher: None,
            logger: logger_factory.create_logger("app_host::deploy"),
            logger_factory,
            state: Mutex::new(DeployerState::Idle),
            resources: tokio::sync::Mutex::new(Resources::default()),
            host_shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Logger factory receiving deployer messages and the child's output.
    pub fn with_logger_factory(mut self, factory: LoggerFactory) -> Self {
        self.logger = factory.create_logger("app_host::deploy");
        self.logger_factory = factory;
        self
    }

    pub fn parameters(&self) -> &DeploymentParameters {
        &self.parameters
    }

    pub fn state(&self) -> DeployerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: DeployerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = ?*state, to = ?next, "Deployer state transition");
        *state = next;
    }

    /// Launch command for `root` bound to `base_uri`.
    pub fn launch_command(&self, root: &std::path::Path, base_uri: &str) -> LaunchCommand {
        let params = &self.parameters;
        let mut command = LaunchCommand::new(&params.runtime)
            .arg("-p")
            .arg(root.to_string_lossy())
            .arg(params.command.as_str())
            .arg(format!("--{}", keys::URLS))
            .arg(base_uri)
            .arg(format!("--{}", keys::SERVER))
            .arg(params.server_type.id())
            .env(
                format!("{ENV_PREFIX}{}", keys::ENVIRONMENT.to_ascii_uppercase()),
                params.environment_name.as_str(),
            );
        for (key, value) in &params.environment_variables {
            command = command.env(key.as_str(), value.as_str());
        }
        command
    }

    fn base_uri(&self) -> Result<String, DeployError> {
        match &self.parameters.application_base_uri {
            Some(uri) => Ok(uri.clone()),
            None => Ok(format!("http://127.0.0.1:{}/", free_port()?)),
        }
    }
}

#[async_trait]
impl ApplicationDeployer for SelfHostDeployer {
    async fn deploy(&self) -> Result<DeploymentResult, DeployError> {
        let mut resources = self.resources.lock().await;
        match self.state() {
            DeployerState::Idle => {}
            DeployerState::ShuttingDown | DeployerState::Cleaned => {
                return Err(DeployError::Disposed)
            }
            _ => return Err(DeployError::AlreadyDeployed),
        }

        let name = self.parameters.application_name();
        let mut root = self.parameters.application_path.clone();

        if self.parameters.publish_application_before_deployment {
            let publisher = self.publisher.as_ref().ok_or(DeployError::PublisherMissing)?;
            let published = publisher
                .publish(&self.parameters)
                .await
                .map_err(DeployError::Publish)?;
            self.logger
                .info(&format!("Published `{name}` to {}", published.display()));
            resources.published = Some(published.clone());
            root = published;
            self.set_state(DeployerState::Published);
        }

        let base_uri = self.base_uri()?;
        let command = self.launch_command(&root, &base_uri);
        self.set_state(DeployerState::Launching);
        self.logger.info(&format!("Executing command: {command}"));

        let process = SupervisedProcess::spawn(
            self.launcher.as_ref(),
            &command,
            &name,
            self.logger_factory.create_logger(format!("app_host::deploy::{name}")),
            self.host_shutdown.clone(),
            self.parameters.graceful_shutdown_timeout,
        )?;
        tracing::info!(application = %name, pid = ?process.pid(), uri = %base_uri, "Application deployed");
        resources.process = Some(process);
        self.set_state(DeployerState::Running);

        Ok(DeploymentResult {
            deployment_root: root,
            parameters: self.parameters.clone(),
            application_base_uri: base_uri,
            host_shutdown: self.host_shutdown.subscribe(),
        })
    }

    async fn dispose(&self) {
        let mut resources = self.resources.lock().await;
        if matches!(self.state(), DeployerState::Cleaned) {
            return;
        }
        self.set_state(DeployerState::ShuttingDown);

        match resources.process.take() {
            Some(process) => {
                if let Some(exit) = process.shutdown().await {
                    tracing::info!(application = process.name(), exit = %exit, "Application stopped");
                }
            }
            None => tracing::debug!("No process to stop"),
        }

        if let Some(published) = resources.published.take() {
            if self.parameters.preserve_published_application {
                self.logger.info(&format!(
                    "Keeping published output at {}",
                    published.display()
                ));
            } else if let Err(err) = tokio::fs::remove_dir_all(&published).await {
                self.logger.warn(&format!(
                    "Failed to remove published output {}: {err}",
                    published.display()
                ));
            }
        }

        if let Some(cleanup) = &self.parameters.user_additional_cleanup {
            cleanup(&self.parameters);
        }

        self.set_state(DeployerState::Cleaned);
    }
}

impl fmt::Debug for SelfHostDeployer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfHostDeployer")
            .field("parameters", &self.parameters)
            .field("state", &self.state())
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}
