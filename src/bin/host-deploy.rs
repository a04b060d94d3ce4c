//! host-deploy
//!
//! Launches `app-host` out of process through the self-host deployer, waits
//! for Ctrl-C or for the host to exit, then cleans up.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

use app_host::deploy::{ApplicationDeployer, DeploymentParameters, SelfHostDeployer, ServerType};
use app_host::lifecycle::signals;
use app_host::observability::init_logging;

#[derive(Parser)]
#[command(name = "host-deploy")]
#[command(about = "Run an application in a self-hosted app-host process", long_about = None)]
struct Cli {
    /// Application directory passed to the host as `-p`.
    application: PathBuf,

    #[arg(short, long, default_value = "axum")]
    server: ServerType,

    #[arg(short, long, default_value = "Production")]
    environment: String,

    /// Host executable. Defaults to `app-host` next to this binary.
    #[arg(long)]
    runtime: Option<PathBuf>,

    /// Base URI; a free local port is used when omitted.
    #[arg(long)]
    uri: Option<String>,

    /// Send a GET to the base URI once deployed and print the response.
    #[arg(long)]
    probe: bool,

    /// Seconds to wait for a graceful exit before killing the host.
    #[arg(long, default_value_t = 10)]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(false);

    let runtime = cli.runtime.clone().unwrap_or_else(default_runtime);
    let mut parameters = DeploymentParameters::new(&cli.application, cli.server)
        .with_environment(cli.environment.as_str())
        .with_runtime(&runtime)
        .with_graceful_timeout(Duration::from_secs(cli.shutdown_timeout));
    if let Some(uri) = &cli.uri {
        parameters = parameters.with_base_uri(uri.as_str());
    }

    let deployer = SelfHostDeployer::new(parameters);
    let mut result = match deployer.deploy().await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "Deployment failed");
            deployer.dispose().await;
            return ExitCode::FAILURE;
        }
    };
    println!("{}", result.application_base_uri);

    if cli.probe {
        if let Err(err) = probe(&result.application_base_uri).await {
            tracing::warn!(error = %err, "Probe failed");
        }
    }

    tokio::select! {
        () = signals::wait_for_shutdown() => tracing::info!("Stopping deployment"),
        () = result.host_shutdown.wait() => tracing::warn!("Host exited"),
    }

    deployer.dispose().await;
    ExitCode::SUCCESS
}

fn default_runtime() -> PathBuf {
    let name = format!("app-host{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .map(|exe| exe.with_file_name(&name))
        .unwrap_or_else(|_| PathBuf::from(name))
}

/// GET the base URI, retrying while the host is still starting.
async fn probe(uri: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let mut attempts = 0;
    let res = loop {
        attempts += 1;
        match client.get(uri).send().await {
            Ok(res) => break res,
            Err(err) if attempts < 50 && err.is_connect() => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(err) => return Err(err.into()),
        }
    };

    let status = res.status();
    let text = res.text().await?;
    println!("{status}");
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
