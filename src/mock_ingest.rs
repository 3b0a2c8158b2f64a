use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// How often the server pings idle publishers.
const SERVER_PING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Default)]
struct StatsInner {
    connections: AtomicU64,
    rejected_handshakes: AtomicU64,
    binary_frames: AtomicU64,
    binary_bytes: AtomicU64,
    text_frames: AtomicU64,
}

/// Point-in-time counters of everything the server has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub connections: u64,
    pub rejected_handshakes: u64,
    pub binary_frames: u64,
    pub binary_bytes: u64,
    pub text_frames: u64,
}

/// In-process ingest endpoint: accepts publisher WebSocket connections on
/// `/ws/ingest/{session}/{publisher}`, authenticates via the `token` query
/// parameter before the upgrade, and counts what arrives. Binary frames are
/// consumed and discarded; this server never persists media.
pub struct MockIngestServer {
    local_addr: SocketAddr,
    stats: Arc<StatsInner>,
    kick_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl MockIngestServer {
    /// Bind and start accepting. With an expected token, handshakes carrying
    /// anything else are refused with 401 before the upgrade completes.
    pub async fn bind(
        addr: &str,
        expected_token: Option<String>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("mock ingest listening on {}", local_addr);

        let stats = Arc::new(StatsInner::default());
        let (kick_tx, _) = broadcast::channel(4);

        let accept_stats = stats.clone();
        let accept_kick = kick_tx.clone();
        let expected = Arc::new(expected_token);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        debug!("publisher connected from {}", peer);
                        tokio::spawn(serve_publisher(
                            socket,
                            expected.clone(),
                            accept_stats.clone(),
                            accept_kick.subscribe(),
                        ));
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            stats,
            kick_tx,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL publishers should derive their ingest URL from.
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            connections: self.stats.connections.load(Ordering::SeqCst),
            rejected_handshakes: self.stats.rejected_handshakes.load(Ordering::SeqCst),
            binary_frames: self.stats.binary_frames.load(Ordering::SeqCst),
            binary_bytes: self.stats.binary_bytes.load(Ordering::SeqCst),
            text_frames: self.stats.text_frames.load(Ordering::SeqCst),
        }
    }

    /// Sever every live publisher connection without a close handshake.
    /// New connections are still accepted.
    pub fn drop_all(&self) {
        let _ = self.kick_tx.send(());
    }

    pub async fn shutdown(self) {
        self.drop_all();
        self.accept_task.abort();
        let _ = self.accept_task.await;
    }
}

async fn serve_publisher(
    socket: TcpStream,
    expected_token: Arc<Option<String>>,
    stats: Arc<StatsInner>,
    mut kick: broadcast::Receiver<()>,
) {
    let reject_stats = stats.clone();
    let check = move |request: &Request, response: Response| {
        let path = request.uri().path();
        let mut segments = path
            .strip_prefix("/ws/ingest/")
            .map(|rest| rest.split('/'))
            .into_iter()
            .flatten();
        let session = segments.next().unwrap_or("");
        let publisher = segments.next().unwrap_or("");
        if session.is_empty() || publisher.is_empty() || segments.next().is_some() {
            reject_stats.rejected_handshakes.fetch_add(1, Ordering::SeqCst);
            return Err(unauthorized("unrecognized ingest path"));
        }

        if let Some(expected) = expected_token.as_ref() {
            let token = request
                .uri()
                .query()
                .into_iter()
                .flat_map(|q| q.split('&'))
                .find_map(|pair| pair.strip_prefix("token="))
                .map(|t| urlencoding::decode(t).map(|d| d.into_owned()))
                .transpose()
                .unwrap_or(None);
            if token.as_deref() != Some(expected.as_str()) {
                reject_stats.rejected_handshakes.fetch_add(1, Ordering::SeqCst);
                return Err(unauthorized("invalid token"));
            }
        }

        debug!(%session, %publisher, "publisher authenticated");
        Ok(response)
    };

    let mut ws = match accept_hdr_async(socket, check).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("handshake refused: {}", e);
            return;
        }
    };
    stats.connections.fetch_add(1, Ordering::SeqCst);

    let mut ping = tokio::time::interval(SERVER_PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = kick.recv() => {
                debug!("dropping publisher without close handshake");
                break;
            }
            _ = ping.tick() => {
                if ws.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            message = ws.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        stats.binary_frames.fetch_add(1, Ordering::SeqCst);
                        stats.binary_bytes.fetch_add(data.len() as u64, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Text(_))) => {
                        stats.text_frames.fetch_add(1, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("publisher disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("publisher read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
