use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::errors::TransportError;

/// Reserved keepalive payload, sent as a text frame on an otherwise idle
/// connection. Expects no reply beyond transport-level liveness.
pub const KEEPALIVE_PAYLOAD: &str = "ping";

/// Establishes ingest connections. Each connection is exclusively owned by
/// the PublishConnection that requested it.
#[async_trait]
pub trait IngestTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn IngestConnection>, TransportError>;
}

/// A live, ordered, reliable connection to the ingest endpoint. Binary frames
/// carry encoded chunks in strict production order.
#[async_trait]
pub trait IngestConnection: Send {
    async fn send_chunk(&mut self, data: Bytes) -> Result<(), TransportError>;

    async fn send_keepalive(&mut self) -> Result<(), TransportError>;

    /// Outbound bytes buffered but not yet handed to the network.
    fn buffered_bytes(&self) -> u64;

    /// Observation channel flipping to `true` once the connection is gone.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Intentional close. Idempotent.
    async fn close(&mut self);
}

/// WebSocket ingest transport.
pub struct WebSocketIngestTransport;

impl WebSocketIngestTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WebSocketIngestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IngestTransport for WebSocketIngestTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn IngestConnection>, TransportError> {
        let (ws_stream, _response) =
            connect_async(url)
                .await
                .map_err(|e| TransportError::HandshakeFailed {
                    reason: e.to_string(),
                })?;

        debug!("ingest handshake complete");
        let (mut sink, mut stream) = ws_stream.split();

        let buffered = Arc::new(AtomicU64::new(0));
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(Message, u64)>();

        // Writer task: owns the sink, drains the outbound queue and keeps the
        // buffered-byte count honest (decrement only after the flush).
        let writer_closed = closed_tx.clone();
        let writer_buffered = buffered.clone();
        tokio::spawn(async move {
            while let Some((message, len)) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("ingest send failed: {}", e);
                    writer_buffered.fetch_sub(len, Ordering::SeqCst);
                    let _ = writer_closed.send(true);
                    break;
                }
                writer_buffered.fetch_sub(len, Ordering::SeqCst);
                if is_close {
                    break;
                }
            }
        });

        // Reader task: drains inbound traffic (server pings are answered by
        // the protocol layer) and reports the close.
        let reader_closed = closed_tx.clone();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Close(frame))) => {
                        debug!("ingest closed by remote: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("ingest read failed: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            let _ = reader_closed.send(true);
        });

        Ok(Box::new(WebSocketIngestConnection {
            outbound: outbound_tx,
            buffered,
            closed_tx,
            closed_rx,
        }))
    }
}

pub struct WebSocketIngestConnection {
    outbound: mpsc::UnboundedSender<(Message, u64)>,
    buffered: Arc<AtomicU64>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl WebSocketIngestConnection {
    fn enqueue(&self, message: Message, len: u64) -> Result<(), TransportError> {
        if *self.closed_rx.borrow() {
            return Err(TransportError::TransportClosed {
                reason: "connection already closed".to_string(),
            });
        }
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.outbound.send((message, len)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            TransportError::TransportClosed {
                reason: "writer task gone".to_string(),
            }
        })
    }
}

#[async_trait]
impl IngestConnection for WebSocketIngestConnection {
    async fn send_chunk(&mut self, data: Bytes) -> Result<(), TransportError> {
        let len = data.len() as u64;
        self.enqueue(Message::Binary(data.to_vec()), len)
    }

    async fn send_keepalive(&mut self) -> Result<(), TransportError> {
        // Keepalive frames do not count against the chunk watermarks.
        self.enqueue(Message::Text(KEEPALIVE_PAYLOAD.to_string()), 0)
    }

    fn buffered_bytes(&self) -> u64 {
        self.buffered.load(Ordering::SeqCst)
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }

    async fn close(&mut self) {
        let _ = self.outbound.send((Message::Close(None), 0));
        let _ = self.closed_tx.send(true);
    }
}
