//! app-host
//!
//! Runs an application in-process on one of the built-in servers.
//!
//! ```text
//! app-host -p <application-path> run --server.urls <uri> --server <axum|hyper>
//!          [--config <file>] [--environment <name>] [-- --key value ...]
//! ```
//!
//! Settings precedence: command line > config file > `APPHOST_*` environment
//! variables > built-in defaults (`startup = "app-host"`, `server = "axum"`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use app_host::config::{from_args, keys, load_config, Configuration};
use app_host::hosting::HostBuilder;
use app_host::observability::{init_logging, metrics};
use app_host::welcome;

#[derive(Parser)]
#[command(name = "app-host")]
#[command(about = "Application host", long_about = None)]
struct Cli {
    /// Application base path.
    #[arg(short = 'p', long = "path")]
    path: Option<PathBuf>,

    #[arg(value_enum, default_value_t = HostCommand::Run)]
    command: HostCommand,

    /// `;`-separated urls to listen on.
    #[arg(long = "server.urls")]
    urls: Option<String>,

    /// Server name.
    #[arg(long)]
    server: Option<String>,

    #[arg(long)]
    environment: Option<String>,

    /// TOML or JSON settings file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,

    /// Extra `--key value` settings.
    #[arg(last = true)]
    settings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HostCommand {
    /// Serve until Ctrl-C, SIGTERM or the application stops itself.
    Run,
    /// Build the host, print the effective options and exit.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "app-host starting");

    let mut defaults = Configuration::new();
    defaults
        .set(keys::STARTUP, welcome::ASSEMBLY)
        .set(keys::SERVER, "axum");

    let mut builder = HostBuilder::new()
        .with_defaults(defaults)
        .with_environment_variables()
        .use_startup_registry(welcome::registry());

    if let Some(path) = &cli.config {
        match load_config(path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), settings = config.len(), "Configuration loaded");
                builder = builder.use_configuration(config);
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(path) = &cli.path {
        builder = builder.use_base_path(path);
    }
    if let Some(urls) = &cli.urls {
        builder = builder.use_setting(keys::URLS, urls.as_str());
    }
    if let Some(server) = &cli.server {
        builder = builder.use_server(server);
    }
    if let Some(environment) = &cli.environment {
        builder = builder.use_environment(environment);
    }
    for (key, value) in from_args(&cli.settings).iter() {
        builder = builder.use_setting(key, value);
    }

    let host = match builder.build() {
        Ok(host) => host,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build host");
            return ExitCode::FAILURE;
        }
    };

    if cli.command == HostCommand::Check {
        let exit = match serde_json::to_string_pretty(host.options()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to render options");
                ExitCode::FAILURE
            }
        };
        host.dispose().await;
        return exit;
    }

    if let Some(address) = host.configuration().get(keys::METRICS_ADDRESS) {
        match address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(err) = metrics::init_metrics(addr) {
                    tracing::error!(error = %err, "Failed to start metrics exporter");
                }
            }
            Err(err) => {
                tracing::error!(metrics_address = address, error = %err, "Failed to parse metrics address");
            }
        }
    }

    match host.run().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Host terminated with an error");
            ExitCode::FAILURE
        }
    }
}
