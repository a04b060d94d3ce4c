//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use tokio::sync::watch;

use app_host::deploy::{
    ChildProcess, DeploymentParameters, LaunchCommand, OutputStream, ProcessExit, ProcessLauncher,
    Publisher,
};
use app_host::hosting::{Disposable, Startup, StartupContext, StartupError, StartupHooks};
use app_host::http::Response;
use app_host::observability::{LogLevel, LogSink};
use app_host::BoxError;

/// Log sink that keeps every record.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(LogLevel, String, String)>>,
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, category: &str, message: &str) {
        self.records
            .lock()
            .unwrap()
            .push((level, category.to_string(), message.to_string()));
    }
}

impl MemorySink {
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _, _)| *l == level)
            .map(|(_, _, message)| message.clone())
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|(_, category, _)| category.clone())
            .collect()
    }
}

/// Answers every request with `hello from <environment>`.
pub struct HelloStartup {
    environment: String,
}

impl Startup for HelloStartup {
    fn create(context: &StartupContext) -> Result<Self, StartupError> {
        Ok(Self {
            environment: context.environment().environment_name().to_string(),
        })
    }

    fn hooks(self: Arc<Self>, hooks: &mut StartupHooks) {
        hooks.configure(move |app| {
            let body = format!("hello from {}", self.environment);
            app.run(move |_ctx| {
                let body = body.clone();
                async move { Ok(Response::text(StatusCode::OK, body)) }
            });
            Ok(())
        });
    }
}

/// Registers services but forgets the configure hook.
pub struct IncompleteStartup;

impl Startup for IncompleteStartup {
    fn create(_context: &StartupContext) -> Result<Self, StartupError> {
        Ok(Self)
    }

    fn hooks(self: Arc<Self>, hooks: &mut StartupHooks) {
        hooks.configure_services(|_services| Ok(()));
    }
}

/// Appends its name to a shared journal when disposed.
pub struct Journaled {
    pub name: &'static str,
    pub journal: Arc<Mutex<Vec<&'static str>>>,
}

impl Disposable for Journaled {
    fn dispose(&self) {
        self.journal.lock().unwrap().push(self.name);
    }
}

/// Handle the test keeps to drive a fake child process.
#[derive(Clone)]
pub struct ProcessControl {
    exit: Arc<watch::Sender<Option<ProcessExit>>>,
    terminations: Arc<AtomicUsize>,
    kills: Arc<AtomicUsize>,
}

impl ProcessControl {
    fn new() -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            exit: Arc::new(exit),
            terminations: Arc::new(AtomicUsize::new(0)),
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the process exit with `code`.
    pub fn exit(&self, code: i32) {
        self.exit.send_replace(Some(ProcessExit::new(Some(code))));
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// Launcher producing scripted in-memory processes.
pub struct FakeLauncher {
    pub control: ProcessControl,
    exit_immediately: Option<i32>,
    ignore_terminate: bool,
    stdout: String,
    stderr: String,
    launched: Mutex<Vec<LaunchCommand>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            control: ProcessControl::new(),
            exit_immediately: None,
            ignore_terminate: false,
            stdout: String::new(),
            stderr: String::new(),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn exiting_immediately(mut self, code: i32) -> Self {
        self.exit_immediately = Some(code);
        self
    }

    /// The process ignores graceful termination and has to be killed.
    pub fn ignoring_terminate(mut self) -> Self {
        self.ignore_terminate = true;
        self
    }

    pub fn with_output(mut self, stdout: &str, stderr: &str) -> Self {
        self.stdout = stdout.to_string();
        self.stderr = stderr.to_string();
        self
    }

    pub fn launched(&self) -> Vec<LaunchCommand> {
        self.launched.lock().unwrap().clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn ChildProcess>> {
        self.launched.lock().unwrap().push(command.clone());
        if let Some(code) = self.exit_immediately {
            self.control.exit(code);
        }
        Ok(Box::new(FakeChild {
            stdout: Some(Cursor::new(self.stdout.clone().into_bytes())),
            stderr: Some(Cursor::new(self.stderr.clone().into_bytes())),
            exit: self.control.exit.subscribe(),
            control: self.control.clone(),
            ignore_terminate: self.ignore_terminate,
        }))
    }
}

struct FakeChild {
    stdout: Option<Cursor<Vec<u8>>>,
    stderr: Option<Cursor<Vec<u8>>>,
    exit: watch::Receiver<Option<ProcessExit>>,
    control: ProcessControl,
    ignore_terminate: bool,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.stdout.take().map(|s| Box::new(s) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.stderr.take().map(|s| Box::new(s) as OutputStream)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(*self.exit.borrow())
    }

    async fn wait(&mut self) -> io::Result<ProcessExit> {
        let exit = *self
            .exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("fake process control dropped"))?;
        exit.ok_or_else(|| io::Error::other("no exit status"))
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.control.terminations.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_terminate {
            self.control.exit(0);
        }
        Ok(())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.control.kills.fetch_add(1, Ordering::SeqCst);
        self.control.exit.send_replace(Some(ProcessExit::new(None)));
        Ok(())
    }
}

/// Publisher that writes a marker file into `target`.
pub struct DirectoryPublisher {
    pub target: PathBuf,
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(&self, parameters: &DeploymentParameters) -> Result<PathBuf, BoxError> {
        tokio::fs::create_dir_all(&self.target).await?;
        tokio::fs::write(
            self.target.join("published.txt"),
            parameters.application_name(),
        )
        .await?;
        Ok(self.target.clone())
    }
}

/// GET `url`, retrying while the server is not accepting connections yet.
pub async fn get_with_retry(client: &reqwest::Client, url: &str) -> reqwest::Response {
    for _ in 0..100 {
        match client.get(url).send().await {
            Ok(response) => return response,
            Err(err) if err.is_connect() => tokio::time::sleep(Duration::from_millis(100)).await,
            Err(err) => panic!("request to {url} failed: {err}"),
        }
    }
    panic!("server at {url} never became reachable");
}
