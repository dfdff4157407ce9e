//! ZMQ subscriber for the node's `hashtx`/`hashblock`/`sequence` publishers.
//! Delivery is best-effort: the node's PUB socket drops messages under
//! backpressure, so the Monitor treats this purely as a low-latency hint
//! and falls back to periodic reconciliation.

use std::thread;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ZmqError {
    #[error("failed to create zmq context: {0}")]
    Context(zmq::Error),

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },

    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: &'static str,
        #[source]
        source: zmq::Error,
    },
}

#[derive(Debug, Clone)]
pub enum Notification {
    /// 32-byte transaction hash, hex-encoded.
    HashTx { hash: String, sequence: u32 },
    /// 32-byte block hash, hex-encoded.
    HashBlock { hash: String, sequence: u32 },
    /// Raw sequence frame, used only for diagnostics.
    Sequence { raw: Vec<u8> },
}

pub struct ZmqEndpoints {
    pub hashtx: String,
    pub hashblock: String,
    pub sequence: Option<String>,
}

/// Bounded channel capacity for the notification queue consumed by the Monitor.
const QUEUE_CAPACITY: usize = 4096;

/// Spawns a dedicated OS thread running a blocking ZMQ SUB loop and returns
/// a bounded async channel fed from it. `zmq`'s socket API is synchronous,
/// so it cannot live directly on a tokio worker thread without blocking it.
pub fn subscribe(endpoints: ZmqEndpoints) -> Result<mpsc::Receiver<Notification>, ZmqError> {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

    let context = zmq::Context::new();
    let socket = context.socket(zmq::SUB).map_err(ZmqError::Context)?;

    socket
        .connect(&endpoints.hashtx)
        .map_err(|source| ZmqError::Connect {
            endpoint: endpoints.hashtx.clone(),
            source,
        })?;
    if endpoints.hashblock != endpoints.hashtx {
        socket
            .connect(&endpoints.hashblock)
            .map_err(|source| ZmqError::Connect {
                endpoint: endpoints.hashblock.clone(),
                source,
            })?;
    }
    if let Some(seq_endpoint) = &endpoints.sequence {
        if seq_endpoint != &endpoints.hashtx && seq_endpoint != &endpoints.hashblock {
            socket
                .connect(seq_endpoint)
                .map_err(|source| ZmqError::Connect {
                    endpoint: seq_endpoint.clone(),
                    source,
                })?;
        }
    }

    socket
        .set_subscribe(b"hashtx")
        .map_err(|source| ZmqError::Subscribe { topic: "hashtx", source })?;
    socket
        .set_subscribe(b"hashblock")
        .map_err(|source| ZmqError::Subscribe { topic: "hashblock", source })?;
    if endpoints.sequence.is_some() {
        socket
            .set_subscribe(b"sequence")
            .map_err(|source| ZmqError::Subscribe { topic: "sequence", source })?;
    }

    thread::Builder::new()
        .name("zmq-subscriber".into())
        .spawn(move || run_loop(socket, tx))
        .expect("failed to spawn zmq subscriber thread");

    Ok(rx)
}

fn run_loop(socket: zmq::Socket, tx: mpsc::Sender<Notification>) {
    loop {
        let frames = match socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(?err, "zmq recv failed, retrying");
                continue;
            }
        };
        // Node ZMQ publishers emit [topic, body, sequence_le_u32].
        let (Some(topic), Some(body)) = (frames.first(), frames.get(1)) else {
            tracing::warn!("malformed zmq frame, expected at least topic+body");
            continue;
        };
        let sequence = frames
            .get(2)
            .and_then(|s| s.get(0..4))
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0);

        let notification = match topic.as_slice() {
            b"hashtx" => Notification::HashTx {
                hash: hex::encode(body),
                sequence,
            },
            b"hashblock" => Notification::HashBlock {
                hash: hex::encode(body),
                sequence,
            },
            b"sequence" => Notification::Sequence { raw: body.clone() },
            other => {
                tracing::debug!(topic = ?String::from_utf8_lossy(other), "ignoring unknown zmq topic");
                continue;
            }
        };

        // A full queue means the consumer is lagging; best-effort delivery
        // means we drop rather than block the ZMQ thread.
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(notification) {
            tracing::warn!("notification queue full, dropping zmq event");
        } else if tx.is_closed() {
            break;
        }
    }
}
