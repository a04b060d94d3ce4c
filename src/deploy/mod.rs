//! Self-Host Deployment Subsystem
//!
//! Launches the host binary as a child process, streams its output into the
//! logging sink and tears it down again.
//!
//! # Responsibilities
//! - Optional publish step through a [`Publisher`]
//! - Compute the base URI and the launch arguments
//! - Supervise the child: output streaming, immediate-exit detection and a
//!   one-shot signal fired on exit
//! - Idempotent cleanup of the process and the published output

pub mod error;
pub mod parameters;
pub mod process;
pub mod publish;
pub mod self_host;

pub use error::DeployError;
pub use parameters::{CleanupFn, DeploymentParameters, DeploymentResult, ServerType};
pub use process::{
    ChildProcess, LaunchCommand, OutputStream, ProcessExit, ProcessLauncher, SupervisedProcess,
    TokioLauncher,
};
pub use publish::Publisher;
pub use self_host::{ApplicationDeployer, DeployerState, SelfHostDeployer};
