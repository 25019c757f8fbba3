use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use raft_kv::server::{Config, Server};
use tracing_subscriber::EnvFilter;

/// A node of the replicated key-value store.
///
/// Every node in the cluster is started with the same peer port list; a
/// node's id is its zero-based position in that list.
#[derive(Parser)]
struct Args {
    /// TCP port to listen on for peer RPCs.
    port: u16,

    /// Comma-separated list of all nodes' peer ports, in id order.
    peers: String,

    /// This node's id.
    id: u64,

    /// Heartbeat interval in milliseconds.
    heartbeat_ms: u64,

    /// Election timeout in milliseconds.
    election_ms: u64,

    /// Address for the client HTTP API. Defaults to 127.0.0.1:(port + 1000).
    #[arg(long)]
    api_addr: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let ports = args
        .peers
        .split(',')
        .map(|p| p.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid peer list '{}': {e}", args.peers))?;

    if args.id as usize >= ports.len() {
        return Err(format!("id {} out of range for {} peers", args.id, ports.len()).into());
    }

    let mut peers = HashMap::new();
    for (id, &port) in ports.iter().enumerate() {
        if id as u64 != args.id {
            peers.insert(id as u64, format!("127.0.0.1:{port}"));
        }
    }

    let api_addr = args
        .api_addr
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port + 1000));

    Server::start(Config {
        id: args.id,
        addr: format!("127.0.0.1:{}", args.port),
        api_addr,
        peers,
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        election_timeout: Duration::from_millis(args.election_ms),
    })?
    .run()?;

    Ok(())
}
