//! udpfleetd - UDP proxy fleet control plane
//!
//! Runs the fleet registry, the snapshot synchronizer and the discovery
//! server in one process.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:18000)
//! udpfleetd
//!
//! # Start with a config file and a port override
//! udpfleetd start --config /etc/udpfleet/udpfleetd.toml --port 19000
//!
//! # Print the effective configuration and exit
//! udpfleetd check-config
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use udpfleetd::{ConnectionLimits, ControlPlane, DaemonConfig, DiscoveryServer};

/// udpfleet daemon - push-based configuration for UDP proxy sidecars
#[derive(Parser, Debug)]
#[command(name = "udpfleetd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control plane (default)
    Start,
    /// Validate and print the effective configuration
    CheckConfig,
}

#[derive(ClapArgs, Debug, Default)]
struct Overrides {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, global = true)]
    bind: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Capacity of the registry notification channels
    #[arg(long, global = true)]
    notify_buffer: Option<usize>,
}

impl Overrides {
    fn load(&self) -> Result<DaemonConfig> {
        let mut config =
            DaemonConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(notify_buffer) = self.notify_buffer {
            config.notify_buffer = notify_buffer;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.overrides.load()?;

    match args.command.unwrap_or(Command::Start) {
        Command::Start => run_daemon(config),
        Command::CheckConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("udpfleetd=info".parse()?)
                .add_directive("udpfleet_core=info".parse()?)
                .add_directive("udpfleet_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "udpfleet daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let ControlPlane {
        registry,
        cache,
        sync,
    } = ControlPlane::start(&config);

    let addr = config.listen_addr();
    let server = DiscoveryServer::bind(
        addr,
        registry,
        cache,
        ConnectionLimits::from(&config),
        cancel_token.clone(),
    )
    .await
    .with_context(|| format!("Failed to start discovery server on {addr}"))?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
                return Err(e.into());
            }
        }
        fatal = sync.fatal() => {
            error!(error = %fatal, "Snapshot synchronizer stopped");
            cancel_token.cancel();
            return Err(fatal.into());
        }
    }

    info!("udpfleet daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
