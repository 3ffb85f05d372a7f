//! udpfleet - command-line client for the udpfleet daemon
//!
//! Drives the control commands a reconcile layer would issue, lists the
//! published snapshots and can follow a node's discovery stream.
//!
//! # Usage
//!
//! ```text
//! udpfleet receiver add edge:7000 --address 10.0.0.1 --workload pod-1
//! udpfleet receiver remove edge --workload pod-1
//! udpfleet sender add edge --workload pod-s1
//! udpfleet sender remove edge --workload pod-s1
//! udpfleet snapshots
//! udpfleet watch edge
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use udpfleet_client::client::DEFAULT_SERVER;
use udpfleet_client::FleetClient;
use udpfleet_core::ReceiverAnnotation;

// ============================================================================
// CLI Arguments
// ============================================================================

/// udpfleet - manage and observe a UDP proxy fleet
#[derive(Parser, Debug)]
#[command(name = "udpfleet", version, about)]
struct Args {
    /// Daemon address
    #[arg(long, short = 's', env = "UDPFLEET_SERVER", default_value = DEFAULT_SERVER, global = true)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receiver endpoints
    #[command(subcommand)]
    Receiver(ReceiverCommand),
    /// Sender workloads
    #[command(subcommand)]
    Sender(SenderCommand),
    /// List published snapshots
    Snapshots,
    /// Subscribe as a node and print every pushed response
    Watch {
        /// Node (proxy group) to subscribe as
        node: String,
    },
}

#[derive(Subcommand, Debug)]
enum ReceiverCommand {
    /// Add or move a receiver
    Add {
        /// Receiver annotation value, `<group>:<port>`
        annotation: ReceiverAnnotation,
        /// Receiver IP address
        #[arg(long)]
        address: String,
        #[arg(long)]
        workload: String,
    },
    /// Remove a receiver
    Remove {
        group: String,
        #[arg(long)]
        workload: String,
    },
}

#[derive(Subcommand, Debug)]
enum SenderCommand {
    /// Register a sender
    Add {
        group: String,
        #[arg(long)]
        workload: String,
    },
    /// Unregister a sender
    Remove {
        group: String,
        #[arg(long)]
        workload: String,
    },
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut client = FleetClient::connect(args.server.as_str(), None)
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", args.server))?;

    match args.command {
        Command::Receiver(ReceiverCommand::Add {
            annotation,
            address,
            workload,
        }) => {
            client
                .add_receiver(annotation.group.as_str(), annotation.port, &address, &workload)
                .await?;
            println!("receiver {workload} -> {address}:{} in {}", annotation.port, annotation.group);
        }
        Command::Receiver(ReceiverCommand::Remove { group, workload }) => {
            client.remove_receiver(&group, &workload).await?;
            println!("receiver {workload} removed from {group}");
        }
        Command::Sender(SenderCommand::Add { group, workload }) => {
            client.add_sender(&group, &workload).await?;
            println!("sender {workload} added to {group}");
        }
        Command::Sender(SenderCommand::Remove { group, workload }) => {
            let last = client.remove_sender(&group, &workload).await?;
            if last {
                println!("sender {workload} removed; {group} has no senders left");
            } else {
                println!("sender {workload} removed from {group}");
            }
        }
        Command::Snapshots => {
            let snapshots = client.list_snapshots().await?;
            if snapshots.is_empty() {
                println!("no snapshots published");
            }
            for s in snapshots {
                println!(
                    "{:<24} v{:<6} {:>4} endpoints  {}",
                    s.node.as_str(),
                    s.version,
                    s.endpoints,
                    s.published_at.to_rfc3339()
                );
            }
        }
        Command::Watch { node } => {
            client.subscribe(&node).await?;
            loop {
                let response = client.next_response().await?;
                println!("{}", serde_json::to_string_pretty(&response)?);
                client.ack(&response).await?;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
