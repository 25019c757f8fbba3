use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::{Message, NodeId};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),
}

/// Wire envelope: wraps a Raft message with the sender's identity.
#[derive(Serialize, Deserialize)]
struct Envelope<Cmd> {
    from: NodeId,
    message: Message<Cmd>,
}

/// TCP transport for Raft RPCs.
///
/// Messages are framed with a 4-byte big-endian length prefix followed by a
/// JSON-serialized `Envelope`. Each peer gets one persistent outbound
/// connection, dialed at startup with blocking 1 s retry and fed by a
/// dedicated writer thread; a failed write drops the frame and the writer
/// re-dials on the next send. Inbound connections are accepted by a
/// background thread and read by one long-lived reader thread each. Dropped
/// frames are fine: Raft assumes an unreliable network, and the next
/// heartbeat or election retries.
pub struct Transport<Cmd> {
    rx: mpsc::Receiver<(NodeId, Message<Cmd>)>,
    outbound: HashMap<NodeId, mpsc::Sender<Message<Cmd>>>,
    /// Keeping this Arc alive closes the listener when Transport is dropped,
    /// which causes the accept loop to receive an error and exit.
    _listener: Arc<TcpListener>,
}

impl<Cmd> Transport<Cmd>
where
    Cmd: Send + 'static + Serialize + DeserializeOwned,
{
    /// Bind a listener on `addr`, then dial every peer. Blocks, retrying
    /// each peer every second, until all connections are up — the cluster
    /// starts as a whole or not at all.
    pub fn bind(
        local_id: NodeId,
        addr: SocketAddr,
        peers: HashMap<NodeId, SocketAddr>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self::start(local_id, listener, peers))
    }

    fn start(
        local_id: NodeId,
        listener: TcpListener,
        peers: HashMap<NodeId, SocketAddr>,
    ) -> Self {
        let listener = Arc::new(listener);
        let (tx, rx) = mpsc::channel();
        let listener_bg = Arc::clone(&listener);
        thread::spawn(move || accept_loop::<Cmd>(listener_bg, tx));

        let mut outbound = HashMap::new();
        for (peer, peer_addr) in peers {
            let stream = dial_with_retry(peer_addr);
            tracing::info!(peer = %peer, addr = %peer_addr, "connected to peer");
            let (peer_tx, peer_rx) = mpsc::channel::<Message<Cmd>>();
            thread::spawn(move || writer_loop(local_id, peer_addr, stream, peer_rx));
            outbound.insert(peer, peer_tx);
        }

        Self {
            rx,
            outbound,
            _listener: listener,
        }
    }

    /// Hand a message to the peer's writer thread. Returns immediately;
    /// unknown peer is the only synchronous error — I/O failures during the
    /// actual send are swallowed (see struct-level docs).
    pub fn send(&self, to: NodeId, message: Message<Cmd>) -> Result<(), TransportError> {
        let peer_tx = self.outbound.get(&to).ok_or(TransportError::UnknownPeer(to))?;
        let _ = peer_tx.send(message);
        Ok(())
    }

    /// Block until a message arrives or `timeout` elapses. Returns `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<(NodeId, Message<Cmd>)> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// The address this transport is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self._listener.local_addr()?)
    }
}

/// Dial a peer with unbounded retry, one attempt per second.
fn dial_with_retry(addr: SocketAddr) -> TcpStream {
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                let _ = stream.set_write_timeout(Some(Duration::from_millis(500)));
                return stream;
            }
            Err(error) => {
                tracing::warn!(%addr, %error, "peer not reachable yet, retrying");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Owns the persistent connection to one peer. A write failure drops the
/// frame, discards the stream, and re-dials (one attempt) on the next send.
fn writer_loop<Cmd: Serialize>(
    from: NodeId,
    addr: SocketAddr,
    stream: TcpStream,
    rx: mpsc::Receiver<Message<Cmd>>,
) {
    let mut stream = Some(stream);
    while let Ok(message) = rx.recv() {
        let frame = match encode_frame(&Envelope { from, message }) {
            Ok(frame) => frame,
            Err(_) => continue,
        };

        if stream.is_none() {
            stream = TcpStream::connect_timeout(&addr, Duration::from_millis(200))
                .map(|s| {
                    let _ = s.set_write_timeout(Some(Duration::from_millis(500)));
                    s
                })
                .ok();
        }

        let Some(live) = &mut stream else {
            tracing::debug!(%addr, "peer unreachable, frame dropped");
            continue;
        };
        if let Err(error) = live.write_all(&frame).and_then(|()| live.flush()) {
            tracing::debug!(%addr, %error, "write failed, frame dropped");
            stream = None;
        }
    }
}

fn accept_loop<Cmd: Send + 'static + DeserializeOwned>(
    listener: Arc<TcpListener>,
    tx: mpsc::Sender<(NodeId, Message<Cmd>)>,
) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx.clone();
                thread::spawn(move || reader_loop(stream, tx));
            }
            // Listener was closed (Transport dropped) or an unrecoverable error.
            Err(_) => break,
        }
    }
}

/// Reads envelopes off one inbound connection until it closes. No read
/// timeout: connections are long-lived and idle between heartbeats.
fn reader_loop<Cmd: DeserializeOwned>(
    stream: TcpStream,
    tx: mpsc::Sender<(NodeId, Message<Cmd>)>,
) {
    while let Ok(envelope) = read_envelope::<Cmd>(&stream) {
        if tx.send((envelope.from, envelope.message)).is_err() {
            break;
        }
    }
}

/// Serialize one envelope into a length-prefixed frame.
fn encode_frame<Cmd: Serialize>(envelope: &Envelope<Cmd>) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_vec(envelope)?;
    let Ok(len) = u32::try_from(body.len()) else {
        return Err(TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "message exceeds 4 GiB",
        )));
    };
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one length-prefixed JSON envelope from the stream.
fn read_envelope<Cmd: DeserializeOwned>(
    mut stream: &TcpStream,
) -> Result<Envelope<Cmd>, TransportError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}
