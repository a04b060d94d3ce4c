//! Out-of-process deployment.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use app_host::deploy::{
    ApplicationDeployer, DeployError, DeployerState, DeploymentParameters, SelfHostDeployer,
    ServerType,
};
use app_host::observability::{LogLevel, LoggerFactory};

mod common;
use common::{get_with_retry, DirectoryPublisher, FakeLauncher, MemorySink};

const WAIT: Duration = Duration::from_secs(10);

fn parameters() -> DeploymentParameters {
    DeploymentParameters::new("/srv/apps/shop", ServerType::Axum)
        .with_runtime("/opt/app-host/bin/app-host")
        .with_graceful_timeout(Duration::from_millis(200))
}

fn deployer(params: DeploymentParameters, launcher: &Arc<FakeLauncher>) -> (SelfHostDeployer, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::default());
    let deployer = SelfHostDeployer::new(params)
        .with_launcher(launcher.clone())
        .with_logger_factory(LoggerFactory::new(sink.clone()));
    (deployer, sink)
}

#[tokio::test]
async fn test_launches_host_with_server_and_urls() {
    let launcher = Arc::new(FakeLauncher::new());
    let params = parameters()
        .with_environment("Development")
        .with_base_uri("http://127.0.0.1:5123/");
    let (deployer, _sink) = deployer(params, &launcher);

    let result = deployer.deploy().await.unwrap();
    assert_eq!(result.application_base_uri, "http://127.0.0.1:5123/");
    assert_eq!(result.deployment_root, PathBuf::from("/srv/apps/shop"));
    assert_eq!(deployer.state(), DeployerState::Running);

    let launched = launcher.launched();
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].program, PathBuf::from("/opt/app-host/bin/app-host"));
    assert_eq!(
        launched[0].args,
        [
            "-p",
            "/srv/apps/shop",
            "run",
            "--server.urls",
            "http://127.0.0.1:5123/",
            "--server",
            "axum",
        ]
    );
    assert_eq!(
        launched[0].env.get("APPHOST_ENVIRONMENT").map(String::as_str),
        Some("Development")
    );

    deployer.dispose().await;
}

#[tokio::test]
async fn test_free_port_when_no_base_uri() {
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, _sink) = deployer(parameters(), &launcher);

    let result = deployer.deploy().await.unwrap();
    let uri = &result.application_base_uri;
    assert!(uri.starts_with("http://127.0.0.1:"), "{uri}");
    assert!(uri.ends_with('/'));
    let port: u16 = uri["http://127.0.0.1:".len()..uri.len() - 1].parse().unwrap();
    assert_ne!(port, 0);
    assert!(launcher.launched()[0].args.contains(uri));

    deployer.dispose().await;
}

#[tokio::test]
async fn test_process_exit_fires_shutdown_signal_once() {
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, sink) = deployer(parameters(), &launcher);

    let result = deployer.deploy().await.unwrap();
    let mut early = result.host_shutdown.clone();
    assert!(!early.is_triggered());

    launcher.control.exit(2);
    tokio::time::timeout(WAIT, early.wait()).await.unwrap();

    // A listener attached after the exit sees the fired state immediately.
    let mut late = result.host_shutdown.clone();
    assert!(late.is_triggered());
    tokio::time::timeout(Duration::from_millis(100), late.wait())
        .await
        .unwrap();

    deployer.dispose().await;
    assert_eq!(launcher.control.terminations(), 0);

    let exits: Vec<_> = sink
        .messages(LogLevel::Warn)
        .into_iter()
        .filter(|m| m.contains("exited with exit code 2"))
        .collect();
    assert_eq!(exits.len(), 1);
}

#[tokio::test]
async fn test_immediate_exit_is_a_failure() {
    let launcher = Arc::new(FakeLauncher::new().exiting_immediately(3));
    let (deployer, sink) = deployer(parameters(), &launcher);

    match deployer.deploy().await {
        Err(DeployError::ExitedImmediately { name, code }) => {
            assert_eq!(name, "shop");
            assert_eq!(code, Some(3));
        }
        other => panic!("unexpected deploy result: {other:?}"),
    }
    assert!(sink
        .messages(LogLevel::Error)
        .iter()
        .any(|m| m.contains("`shop` exited immediately")));

    deployer.dispose().await;
    assert_eq!(deployer.state(), DeployerState::Cleaned);
}

#[tokio::test]
async fn test_second_deploy_is_rejected() {
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, _sink) = deployer(parameters(), &launcher);

    deployer.deploy().await.unwrap();
    assert!(matches!(
        deployer.deploy().await,
        Err(DeployError::AlreadyDeployed)
    ));
    assert_eq!(launcher.launched().len(), 1);

    deployer.dispose().await;
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
    let cleanups = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cleanups);
    let params = parameters().with_cleanup(move |params| {
        assert_eq!(params.application_name(), "shop");
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, _sink) = deployer(params, &launcher);

    let result = deployer.deploy().await.unwrap();
    deployer.dispose().await;
    deployer.dispose().await;

    assert_eq!(deployer.state(), DeployerState::Cleaned);
    assert_eq!(launcher.control.terminations(), 1);
    assert_eq!(launcher.control.kills(), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(result.host_shutdown.is_triggered());
}

#[tokio::test]
async fn test_unresponsive_process_is_killed() {
    let launcher = Arc::new(FakeLauncher::new().ignoring_terminate());
    let (deployer, _sink) = deployer(parameters(), &launcher);

    let result = deployer.deploy().await.unwrap();
    tokio::time::timeout(WAIT, deployer.dispose()).await.unwrap();

    assert_eq!(launcher.control.terminations(), 1);
    assert_eq!(launcher.control.kills(), 1);
    assert!(result.host_shutdown.is_triggered());
}

#[tokio::test]
async fn test_output_is_streamed_to_logger() {
    let launcher = Arc::new(
        FakeLauncher::new().with_output("Now listening on: http://127.0.0.1:5000\nready\n", "deprecated setting\n"),
    );
    let (deployer, sink) = deployer(parameters(), &launcher);

    deployer.deploy().await.unwrap();
    deployer.dispose().await;

    let info = sink.messages(LogLevel::Info);
    assert!(info.contains(&"Now listening on: http://127.0.0.1:5000".to_string()));
    assert!(info.contains(&"ready".to_string()));
    assert!(sink
        .messages(LogLevel::Warn)
        .contains(&"deprecated setting".to_string()));
    assert!(sink
        .categories()
        .contains(&"app_host::deploy::shop".to_string()));
}

#[tokio::test]
async fn test_publish_requires_publisher() {
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, _sink) = deployer(parameters().with_publish(true), &launcher);

    assert!(matches!(
        deployer.deploy().await,
        Err(DeployError::PublisherMissing)
    ));
    assert!(launcher.launched().is_empty());
    deployer.dispose().await;
}

#[tokio::test]
async fn test_published_output_is_removed_on_dispose() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("publish");
    let launcher = Arc::new(FakeLauncher::new());
    let (deployer, _sink) = deployer(parameters().with_publish(true), &launcher);
    let deployer = deployer.with_publisher(Arc::new(DirectoryPublisher {
        target: target.clone(),
    }));

    let result = deployer.deploy().await.unwrap();
    assert_eq!(result.deployment_root, target);
    assert_eq!(launcher.launched()[0].args[1], target.to_string_lossy());
    assert!(target.join("published.txt").exists());

    deployer.dispose().await;
    assert!(!target.exists());
}

#[tokio::test]
async fn test_preserved_published_output_is_kept() {
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("publish");
    let launcher = Arc::new(FakeLauncher::new());
    let params = parameters()
        .with_publish(true)
        .with_preserve_published(true);
    let (deployer, _sink) = deployer(params, &launcher);
    let deployer = deployer.with_publisher(Arc::new(DirectoryPublisher {
        target: target.clone(),
    }));

    deployer.deploy().await.unwrap();
    deployer.dispose().await;
    assert!(target.join("published.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_deploys_real_host_binary() {
    let app_dir = tempfile::tempdir().unwrap();
    let params = DeploymentParameters::new(app_dir.path(), ServerType::Hyper)
        .with_environment("Development")
        .with_runtime(env!("CARGO_BIN_EXE_app-host"))
        .with_graceful_timeout(Duration::from_secs(5));
    let deployer = SelfHostDeployer::new(params);

    let mut result = deployer.deploy().await.unwrap();
    let client = reqwest::Client::new();

    let response = get_with_retry(&client, &result.application_base_uri).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["environment"], "Development");
    assert_eq!(body["settings"]["server"], "hyper");

    // The application stops itself; the deployer observes the exit.
    let shutdown = client
        .post(format!("{}shutdown", result.application_base_uri))
        .send()
        .await
        .unwrap();
    assert_eq!(shutdown.status(), reqwest::StatusCode::ACCEPTED);
    tokio::time::timeout(WAIT, result.host_shutdown.wait())
        .await
        .unwrap();

    deployer.dispose().await;
    assert_eq!(deployer.state(), DeployerState::Cleaned);
}
