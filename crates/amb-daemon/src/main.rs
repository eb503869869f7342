//! amb-daemon binary: local agent message bridge.
//!
//! Authenticates provisioned local clients over a unix stream socket,
//! routes envelopes between them under per-sender allowlists, queues for
//! offline recipients, and serves a token-gated HTTP control plane.

use amb_daemon::{BridgeDaemon, Config};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// amb-daemon — local agent message bridge
#[derive(Parser, Debug)]
#[command(name = "amb-daemon", version, about = "Local agent message bridge daemon")]
struct Cli {
    /// Config file path (falls back to $AMB_CONFIG, then amb.json beside the binary)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket path override
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("AMB_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "starting amb-daemon"
    );

    let config = match Config::load(&config_path, cli.socket.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let daemon = match BridgeDaemon::new(config) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to create daemon");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal
    tokio::select! {
        result = daemon.run() => {
            if let Err(e) = result {
                error!(error = %e, "daemon error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            daemon.shutdown().await;
        }
    }

    info!("amb-daemon stopped");
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("amb.json")))
        .unwrap_or_else(|| PathBuf::from("amb.json"))
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
