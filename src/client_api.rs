use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{body::Bytes, Router};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::kv::KvCommand;
use crate::types::{LogIndex, NodeId, Term};

/// Outcome of a proposal, as seen by the submitting client.
#[derive(Debug)]
pub enum ProposeOutcome {
    /// Committed and applied.
    Ok,
    /// Committed Delete of a key that was not present.
    KeyNotFound,
    /// This node is not (or is no longer) the leader; retry against `leader`.
    WrongNode { leader: Option<NodeId> },
}

/// Snapshot of the node for harness introspection and operators.
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub role: String,
    pub term: Term,
    pub leader: Option<NodeId>,
    pub commit_index: LogIndex,
}

/// Requests forwarded from the HTTP surface into the Raft event loop.
pub enum ClientRequest {
    Propose {
        command: KvCommand,
        reply: oneshot::Sender<ProposeOutcome>,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Option<i32>>,
    },
    SetElectionTimeout {
        timeout: Duration,
    },
    SetHeartbeatInterval {
        interval: Duration,
    },
    Status {
        reply: oneshot::Sender<NodeStatus>,
    },
}

/// Spawn a background thread that runs an axum HTTP server and forwards
/// requests to the Raft event loop via `tx`.
pub fn start(addr: SocketAddr, tx: mpsc::Sender<ClientRequest>) {
    thread::spawn(move || match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(serve(addr, tx)),
        Err(error) => tracing::error!(%error, "client api: failed to start tokio runtime"),
    });
}

async fn serve(addr: SocketAddr, tx: mpsc::Sender<ClientRequest>) {
    let app = Router::new()
        .route("/kv/{key}", get(handle_get))
        .route("/kv/{key}", put(handle_put))
        .route("/kv/{key}", delete(handle_delete))
        .route("/timers/election", put(handle_set_election_timeout))
        .route("/timers/heartbeat", put(handle_set_heartbeat_interval))
        .route("/status", get(handle_status))
        .with_state(tx);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(error) => {
            tracing::error!(%addr, %error, "client api: bind failed");
            return;
        }
    };

    tracing::info!(%addr, "client api listening");

    if let Err(error) = axum::serve(listener, app).await {
        tracing::error!(%error, "client api: server error");
    }
}

async fn handle_get(
    State(tx): State<mpsc::Sender<ClientRequest>>,
    Path(key): Path<String>,
) -> (StatusCode, String) {
    let (reply, rx) = oneshot::channel();
    if tx.send(ClientRequest::Get { key, reply }).is_err() {
        return shutting_down();
    }
    match await_reply(rx).await {
        Some(Some(value)) => (StatusCode::OK, value.to_string()),
        Some(None) => (StatusCode::NOT_FOUND, String::new()),
        None => timeout_reply(),
    }
}

async fn handle_put(
    State(tx): State<mpsc::Sender<ClientRequest>>,
    Path(key): Path<String>,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(value) = parse_i32(&body) else {
        return (StatusCode::BAD_REQUEST, "body must be a 32-bit integer".into());
    };
    propose(tx, KvCommand::Put { key, value }).await
}

async fn handle_delete(
    State(tx): State<mpsc::Sender<ClientRequest>>,
    Path(key): Path<String>,
) -> (StatusCode, String) {
    propose(tx, KvCommand::Delete { key }).await
}

async fn handle_set_election_timeout(
    State(tx): State<mpsc::Sender<ClientRequest>>,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(ms) = parse_millis(&body) else {
        return (StatusCode::BAD_REQUEST, "body must be milliseconds".into());
    };
    let _ = tx.send(ClientRequest::SetElectionTimeout {
        timeout: Duration::from_millis(ms),
    });
    (StatusCode::OK, String::new())
}

async fn handle_set_heartbeat_interval(
    State(tx): State<mpsc::Sender<ClientRequest>>,
    body: Bytes,
) -> (StatusCode, String) {
    let Some(ms) = parse_millis(&body) else {
        return (StatusCode::BAD_REQUEST, "body must be milliseconds".into());
    };
    let _ = tx.send(ClientRequest::SetHeartbeatInterval {
        interval: Duration::from_millis(ms),
    });
    (StatusCode::OK, String::new())
}

async fn handle_status(State(tx): State<mpsc::Sender<ClientRequest>>) -> (StatusCode, String) {
    let (reply, rx) = oneshot::channel();
    if tx.send(ClientRequest::Status { reply }).is_err() {
        return shutting_down();
    }
    match await_reply(rx).await {
        Some(status) => match serde_json::to_string(&status) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        },
        None => timeout_reply(),
    }
}

/// Send a proposal to the event loop and wait for it to commit (or be
/// refused). The reply arrives once the entry is applied, the node turns out
/// not to be leader, or leadership is lost before commit.
async fn propose(tx: mpsc::Sender<ClientRequest>, command: KvCommand) -> (StatusCode, String) {
    let (reply, rx) = oneshot::channel();
    if tx.send(ClientRequest::Propose { command, reply }).is_err() {
        return shutting_down();
    }

    match await_reply(rx).await {
        Some(ProposeOutcome::Ok) => (StatusCode::OK, "ok".into()),
        Some(ProposeOutcome::KeyNotFound) => (StatusCode::NOT_FOUND, String::new()),
        Some(ProposeOutcome::WrongNode { leader }) => {
            let hint = leader.map_or_else(|| "unknown".into(), |l| l.to_string());
            (StatusCode::MISDIRECTED_REQUEST, hint)
        }
        None => timeout_reply(),
    }
}

/// Wait up to 5 s for the event loop's answer.
async fn await_reply<T>(rx: oneshot::Receiver<T>) -> Option<T> {
    tokio::time::timeout(Duration::from_secs(5), rx).await.ok()?.ok()
}

fn parse_i32(body: &Bytes) -> Option<i32> {
    std::str::from_utf8(body).ok()?.trim().parse().ok()
}

fn parse_millis(body: &Bytes) -> Option<u64> {
    std::str::from_utf8(body).ok()?.trim().parse().ok()
}

fn shutting_down() -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, "server shutting down".into())
}

fn timeout_reply() -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, "timeout".into())
}
