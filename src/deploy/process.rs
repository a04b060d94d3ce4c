//! Child process supervision.
//!
//! # Data Flow
//! ```text
//! ProcessLauncher::launch ──▶ ChildProcess
//!     ├─ stdout lines ─▶ Logger (info)   ┐
//!     ├─ stderr lines ─▶ Logger (warn)   ├─ TaskTracker
//!     └─ exit watcher ─▶ exit status + ShutdownSignal::trigger
//! ```
//!
//! # Design Decisions
//! - The exit watcher owns the child; `shutdown` asks it to stop through a
//!   cancellation token, so the handle is released exactly once
//! - Graceful termination first, kill after the configured wait
//! - On unix the child leads its own process group and signals go to the
//!   whole group, so helpers it forks stop with it
//! - Output readers get a short drain once the child is gone; a grandchild
//!   holding the pipes open does not keep `shutdown` waiting

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::deploy::error::DeployError;
use crate::lifecycle::ShutdownSignal;
use crate::observability::{metrics, LogLevel, Logger};

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// How long output readers may keep draining after the child has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Program, arguments and extra environment for a launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a child exited. `code` is `None` when it was ended by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn new(code: Option<i32>) -> Self {
        Self { code }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A launched process.
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    fn take_stdout(&mut self) -> Option<OutputStream>;

    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Exit status if the process has already exited.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    async fn wait(&mut self) -> io::Result<ProcessExit>;

    /// Ask the process to exit (SIGTERM on unix).
    fn terminate(&mut self) -> io::Result<()>;

    async fn kill(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>>;
}

/// Launches real processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %command, "Spawning process");
        let child = cmd.spawn()?;
        Ok(Box::new(TokioChild { child }))
    }
}

struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as OutputStream)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.child.try_wait()?.map(ProcessExit::from))
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        Ok(self.child.wait().await?.into())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    #[cfg(unix)]
    async fn kill(&mut self) -> io::Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGKILL)?;
        self.child.kill().await
    }

    #[cfg(not(unix))]
    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(unix)]
impl TokioChild {
    /// Signal the child's process group. A group that is already gone is
    /// not an error.
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        match nix::sys::signal::killpg(Pid::from_raw(pid), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(io::Error::from(err)),
        }
    }
}

/// A child process with output streaming and an exit watcher.
pub struct SupervisedProcess {
    name: String,
    pid: Option<u32>,
    stop: CancellationToken,
    output: CancellationToken,
    tasks: TaskTracker,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl SupervisedProcess {
    /// Launch `command` and start supervising it.
    ///
    /// Fails with [`DeployError::ExitedImmediately`] when the child is already
    /// gone once the launch returns. `exited` fires when the child exits.
    pub fn spawn(
        launcher: &dyn ProcessLauncher,
        command: &LaunchCommand,
        name: &str,
        logger: Logger,
        exited: ShutdownSignal,
        graceful_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let mut child = launcher.launch(command).map_err(|source| DeployError::Launch {
            program: command.program.clone(),
            source,
        })?;
        let pid = child.id();
        let tasks = TaskTracker::new();
        let output = CancellationToken::new();

        if let Some(stdout) = child.take_stdout() {
            tasks.spawn(stream_lines(stdout, logger.clone(), LogLevel::Info, output.clone()));
        }
        if let Some(stderr) = child.take_stderr() {
            tasks.spawn(stream_lines(stderr, logger.clone(), LogLevel::Warn, output.clone()));
        }

        if let Some(exit) = child.try_wait()? {
            tasks.close();
            logger.error(&format!("Application `{name}` exited immediately with {exit}"));
            metrics::record_process_exit(exit.code);
            exited.trigger();
            return Err(DeployError::ExitedImmediately {
                name: name.to_string(),
                code: exit.code,
            });
        }

        let stop = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        tasks.spawn(watch_exit(
            child,
            name.to_string(),
            logger,
            stop.clone(),
            graceful_timeout,
            exit_tx,
            exited,
        ));
        tasks.close();

        tracing::info!(application = name, pid = ?pid, "Process started");
        Ok(Self {
            name: name.to_string(),
            pid,
            stop,
            output,
            tasks,
            exit: exit_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    /// Stop the child if it is still running and wait for the watcher and
    /// output tasks to finish.
    ///
    /// Output readers get a short drain once the child is gone and are then
    /// detached, so a grandchild holding the pipes cannot block this call.
    pub async fn shutdown(&self) -> Option<ProcessExit> {
        self.stop.cancel();
        let mut exit = self.exit.clone();
        if exit.wait_for(Option::is_some).await.is_err() {
            tracing::debug!(application = %self.name, "Exit watcher ended without a status");
        }

        if tokio::time::timeout(OUTPUT_DRAIN, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::debug!(application = %self.name, "Output still open after exit, detaching readers");
            self.output.cancel();
            self.tasks.wait().await;
        }
        self.exit_status()
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        self.stop.cancel();
        self.output.cancel();
    }
}

impl fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("exit", &self.exit_status())
            .finish()
    }
}

async fn stream_lines(stream: OutputStream, logger: Logger, level: LogLevel, detach: CancellationToken) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            () = detach.cancelled() => break,
        };
        match next {
            Ok(Some(line)) => logger.log(level, &line),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "Output stream closed");
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Box<dyn ChildProcess>,
    name: String,
    logger: Logger,
    stop: CancellationToken,
    graceful_timeout: Duration,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    exited: ShutdownSignal,
) {
    let finished = tokio::select! {
        status = child.wait() => Some(status),
        () = stop.cancelled() => None,
    };
    let status = match finished {
        Some(status) => status,
        None => terminate(child.as_mut(), &name, graceful_timeout).await,
    };

    let exit = match status {
        Ok(exit) => {
            if exit.success() {
                logger.info(&format!("Application `{name}` exited with {exit}"));
            } else {
                logger.warn(&format!("Application `{name}` exited with {exit}"));
            }
            exit
        }
        Err(err) => {
            logger.error(&format!("Failed to wait for application `{name}`: {err}"));
            ProcessExit::new(None)
        }
    };
    metrics::record_process_exit(exit.code);
    exit_tx.send_replace(Some(exit));

    if exited.trigger() {
        tracing::debug!(application = %name, "Host shutdown signal fired");
    }
}

async fn terminate(
    child: &mut dyn ChildProcess,
    name: &str,
    graceful_timeout: Duration,
) -> io::Result<ProcessExit> {
    tracing::info!(application = name, "Stopping process");
    if let Err(err) = child.terminate() {
        tracing::warn!(application = name, error = %err, "Graceful termination failed");
    }

    match tokio::time::timeout(graceful_timeout, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                application = name,
                timeout = ?graceful_timeout,
                "Process did not exit in time, killing"
            );
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::observability::{LogSink, LoggerFactory};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Lines(Mutex<Vec<(LogLevel, String)>>);

    impl LogSink for Lines {
        fn log(&self, level: LogLevel, _category: &str, message: &str) {
            self.0.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn sh(script: &str) -> LaunchCommand {
        LaunchCommand::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn streams_output_and_fires_on_exit() {
        let sink = Arc::new(Lines::default());
        let logger = LoggerFactory::new(sink.clone()).create_logger("child");
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        let process = SupervisedProcess::spawn(
            &TokioLauncher,
            &sh("sleep 0.2; echo ready; echo oops >&2; exit 3"),
            "script",
            logger,
            signal.clone(),
            Duration::from_secs(5),
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(10), listener.wait())
            .await
            .unwrap();
        assert_eq!(process.shutdown().await, Some(ProcessExit::new(Some(3))));

        let lines = sink.0.lock().unwrap();
        assert!(lines.contains(&(LogLevel::Info, "ready".to_string())));
        assert!(lines.contains(&(LogLevel::Warn, "oops".to_string())));
    }

    #[tokio::test]
    async fn shutdown_terminates_running_child() {
        let signal = ShutdownSignal::new();
        let process = SupervisedProcess::spawn(
            &TokioLauncher,
            &sh("sleep 30"),
            "sleeper",
            LoggerFactory::default().create_logger("child"),
            signal.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!process.has_exited());

        let exit = tokio::time::timeout(Duration::from_secs(10), process.shutdown())
            .await
            .unwrap();
        assert!(exit.is_some());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn shutdown_stops_forked_helpers() {
        let signal = ShutdownSignal::new();
        let process = SupervisedProcess::spawn(
            &TokioLauncher,
            &sh("sleep 30 & wait"),
            "forking",
            LoggerFactory::default().create_logger("child"),
            signal.clone(),
            Duration::from_millis(500),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let exit = tokio::time::timeout(Duration::from_secs(5), process.shutdown())
            .await
            .unwrap();
        assert!(exit.is_some());
        assert!(signal.is_triggered());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn lingering_grandchild_does_not_block_shutdown() {
        let sink = Arc::new(Lines::default());
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();
        let process = SupervisedProcess::spawn(
            &TokioLauncher,
            &sh("sleep 30 & echo detached; exit 0"),
            "orphaning",
            LoggerFactory::new(sink.clone()).create_logger("child"),
            signal.clone(),
            Duration::from_millis(500),
        )
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), listener.wait())
            .await
            .unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(3), process.shutdown())
            .await
            .unwrap();
        assert_eq!(exit, Some(ProcessExit::new(Some(0))));
        assert!(sink
            .0
            .lock()
            .unwrap()
            .contains(&(LogLevel::Info, "detached".to_string())));
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let err = TokioLauncher
            .launch(&LaunchCommand::new("/nonexistent/app-host-binary"))
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
