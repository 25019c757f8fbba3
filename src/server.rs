use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::client_api::{self, ClientRequest, NodeStatus, ProposeOutcome};
use crate::command::Command;
use crate::kv::{KvCommand, KvStore};
use crate::node::{Node, Role};
use crate::runtime::{Event, Runtime, TimerConfig};
use crate::transport::{Transport, TransportError};
use crate::types::{LogIndex, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("config: {0}")]
    Config(String),
}

pub struct Config {
    pub id: u64,
    pub addr: String,
    pub api_addr: String,
    pub peers: HashMap<u64, String>,
    pub heartbeat_interval: Duration,
    pub election_timeout: Duration,
}

/// A running Raft KV node: in-memory state, peer RPCs over TCP, clients over
/// HTTP. The event loop is the single writer of all Raft state.
pub struct Server {
    local_id: NodeId,
    runtime: Runtime<KvCommand, KvStore>,
    transport: Transport<KvCommand>,
    client_rx: mpsc::Receiver<ClientRequest>,
    /// One waiter per appended-but-uncommitted proposal, keyed by log index.
    pending: HashMap<LogIndex, oneshot::Sender<ProposeOutcome>>,
    was_leader: bool,
}

impl Server {
    /// Bind the listener, dial every peer (blocking until the whole cluster
    /// is reachable), start the client API, and only then arm the timers.
    pub fn start(config: Config) -> Result<Self, ServerError> {
        let local_id = NodeId::from(config.id);

        let addr: SocketAddr = config
            .addr
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid addr '{}': {e}", config.addr)))?;
        let api_addr: SocketAddr = config.api_addr.parse().map_err(|e| {
            ServerError::Config(format!("invalid api addr '{}': {e}", config.api_addr))
        })?;

        let peers = parse_peers(&config.peers)?;
        let peer_ids: Vec<NodeId> = peers.keys().copied().collect();

        tracing::info!(node = %local_id, %addr, "listening for peers");
        let transport = Transport::bind(local_id, addr, peers)?;
        tracing::info!(node = %local_id, "connected to all peers");

        let (client_tx, client_rx) = mpsc::channel();
        client_api::start(api_addr, client_tx);

        // Timers arm at Runtime construction, after the dial barrier.
        let runtime = Runtime::new(
            Node::new(local_id, peer_ids),
            KvStore::new(),
            TimerConfig {
                election_timeout: config.election_timeout,
                heartbeat_interval: config.heartbeat_interval,
            },
        );

        Ok(Self {
            local_id,
            runtime,
            transport,
            client_rx,
            pending: HashMap::new(),
            was_leader: false,
        })
    }

    /// Run the Raft event loop. Returns only on I/O error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            // Drain fired timers before blocking — back-to-back timeouts must
            // not be skipped.
            if let Some(event) = self.runtime.poll_timers() {
                let commands = self.runtime.handle(event);
                self.dispatch(commands)?;
                self.finish_round();
                continue;
            }

            // Block until the next timer deadline or an incoming message,
            // whichever comes first; capped so client requests stay fresh.
            let wait = self
                .runtime
                .next_deadline()
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(5));

            if let Some((from, message)) = self.transport.recv_timeout(wait) {
                let commands = self.runtime.handle(Event::Message { from, message });
                self.dispatch(commands)?;
            }

            while let Ok(request) = self.client_rx.try_recv() {
                self.handle_client_request(request);
            }

            self.finish_round();
        }
    }

    fn handle_client_request(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::Propose { command, reply } => {
                match self.runtime.submit(command) {
                    Some(index) => {
                        // Answered when the index commits and applies, or
                        // when leadership is lost first.
                        self.pending.insert(index, reply);
                    }
                    None => {
                        let _ = reply.send(ProposeOutcome::WrongNode {
                            leader: self.runtime.node().known_leader(),
                        });
                    }
                }
            }
            ClientRequest::Get { key, reply } => {
                let _ = reply.send(self.runtime.state_machine().get(&key));
            }
            ClientRequest::SetElectionTimeout { timeout } => {
                tracing::info!(node = %self.local_id, ?timeout, "election timeout reconfigured");
                self.runtime.set_election_timeout(timeout);
            }
            ClientRequest::SetHeartbeatInterval { interval } => {
                tracing::info!(node = %self.local_id, ?interval, "heartbeat interval reconfigured");
                self.runtime.set_heartbeat_interval(interval);
            }
            ClientRequest::Status { reply } => {
                let node = self.runtime.node();
                let role = match node.role {
                    Role::Follower(_) => "follower",
                    Role::Candidate(_) => "candidate",
                    Role::Leader(_) => "leader",
                };
                let _ = reply.send(NodeStatus {
                    role: role.to_string(),
                    term: node.persistent.current_term,
                    leader: node.known_leader(),
                    commit_index: node.volatile.commit_index,
                });
            }
        }
    }

    /// Complete proposal waiters for newly applied entries, and fail every
    /// outstanding waiter when leadership is lost — their entries may never
    /// commit, and the client should retry against the new leader.
    fn finish_round(&mut self) {
        for (index, success) in self.runtime.take_outputs() {
            if let Some(waiter) = self.pending.remove(&index) {
                let outcome = if success {
                    ProposeOutcome::Ok
                } else {
                    ProposeOutcome::KeyNotFound
                };
                let _ = waiter.send(outcome);
            }
        }

        let is_leader = matches!(self.runtime.node().role, Role::Leader(_));
        if self.was_leader && !is_leader {
            let leader = self.runtime.node().known_leader();
            let term = self.runtime.node().persistent.current_term;
            tracing::info!(node = %self.local_id, %term, "stepped down");
            for (_, waiter) in self.pending.drain() {
                let _ = waiter.send(ProposeOutcome::WrongNode { leader });
            }
        } else if !self.was_leader && is_leader {
            let term = self.runtime.node().persistent.current_term;
            tracing::info!(node = %self.local_id, %term, "elected leader");
        }
        self.was_leader = is_leader;
    }

    fn dispatch(&self, commands: Vec<Command<KvCommand>>) -> Result<(), ServerError> {
        for command in commands {
            if let Command::Send { to, message } = command {
                self.transport.send(to, message)?;
            }
        }
        Ok(())
    }
}

fn parse_peers(raw: &HashMap<u64, String>) -> Result<HashMap<NodeId, SocketAddr>, ServerError> {
    raw.iter()
        .map(|(&id, addr_str)| {
            let addr: SocketAddr = addr_str.parse().map_err(|e| {
                ServerError::Config(format!("invalid peer addr '{addr_str}': {e}"))
            })?;
            Ok((NodeId::from(id), addr))
        })
        .collect()
}
