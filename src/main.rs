//! Feature Server
//!
//! Binary entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use featureserver::FeatureServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "featureserver")]
#[command(about = "Read-only REST feature server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "FEATURESERVER_CONFIG", default_value = "featureserver.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[cfg(unix)]
fn spawn_reload_listener(server: Arc<FeatureServer>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                error!("Cannot listen for SIGHUP, reconfiguration disabled: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP");
            match server.reconfigure().await {
                Ok(version) => info!("Reconfigured, catalog version {}", version),
                Err(e) => error!("Reconfiguration failed: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_server: Arc<FeatureServer>) {}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let json = args.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    info!("Feature Server v{}", env!("CARGO_PKG_VERSION"));

    let server = Arc::new(FeatureServer::from_file(&args.config).await?);
    spawn_reload_listener(server.clone());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        () = shutdown => {
            server.shutdown().await;
        }
    }

    Ok(())
}
