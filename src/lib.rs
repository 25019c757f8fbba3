//! Raft consensus over a replicated key-value map.
//!
//! Based on:
//! - "In Search of an Understandable Consensus Algorithm" (Ongaro & Ousterhout)
//! - Diego Ongaro's PhD dissertation
//!
//! The core ([`node`]) is a pure state machine: it consumes timer expiries and
//! peer messages and returns the commands to carry out. [`runtime`] adds
//! timers and the applied state machine, [`server`] wires in the TCP peer
//! transport and the HTTP client API, and [`cluster`] drives whole simulated
//! clusters deterministically for tests.

pub mod client_api;
pub mod cluster;
pub mod command;
pub mod kv;
pub mod node;
pub mod runtime;
pub mod server;
pub mod state;
pub mod transport;
pub mod types;

pub use kv::{KvCommand, KvStore};
pub use node::Node;
pub use runtime::{Event, Runtime, StateMachine, TimerConfig};
pub use types::{LogEntry, LogIndex, NodeId, Term};
