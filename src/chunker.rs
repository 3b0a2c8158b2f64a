use std::time::{Duration, SystemTime};
use bytes::{Bytes, BytesMut};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::Chunk;

/// Capacity of the emitted chunk channel.
const CHUNK_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkerControl {
    Running,
    Paused,
    Stopped,
}

/// Wraps the encoder feed of a live capture stream and emits a lazy,
/// time-ordered sequence of encoded chunks on a fixed wall-clock interval.
///
/// The sequence is infinite and non-restartable: after `stop` a new `start`
/// call (and a new Chunker) is required. Pausing suppresses emission without
/// losing in-flight encoder output; stopping flushes the residual buffer as
/// one final chunk.
pub struct Chunker {
    control: watch::Sender<ChunkerControl>,
    task: Option<JoinHandle<Chunk>>,
}

impl Chunker {
    /// Begin chunking an encoded feed. Returns the chunker handle and the
    /// receiving end of the chunk sequence.
    pub fn start(feed: &broadcast::Sender<Bytes>, interval: Duration) -> (Self, mpsc::Receiver<Chunk>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (control_tx, mut control_rx) = watch::channel(ChunkerControl::Running);
        let mut feed = feed.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately.
            ticker.tick().await;

            let mut buffer = BytesMut::new();
            let mut paused = false;

            loop {
                tokio::select! {
                    changed = control_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        match *control_rx.borrow() {
                            ChunkerControl::Stopped => break,
                            ChunkerControl::Paused => paused = true,
                            ChunkerControl::Running => paused = false,
                        }
                    }
                    received = feed.recv() => {
                        match received {
                            Ok(bytes) => buffer.extend_from_slice(&bytes),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!("chunker lagged behind encoder feed by {} messages", skipped);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                // Encoder feed ended; keep ticking out what is
                                // buffered until told to stop.
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if paused || buffer.is_empty() {
                            continue;
                        }
                        let chunk = Chunk {
                            data: buffer.split().freeze(),
                            produced_at: SystemTime::now(),
                            is_final: false,
                        };
                        if chunk_tx.send(chunk).await.is_err() {
                            // Consumer gone; nothing left to emit to.
                            break;
                        }
                    }
                }
            }

            let final_chunk = Chunk {
                data: buffer.freeze(),
                produced_at: SystemTime::now(),
                is_final: true,
            };
            let _ = chunk_tx.try_send(final_chunk.clone());
            final_chunk
        });

        (
            Self {
                control: control_tx,
                task: Some(task),
            },
            chunk_rx,
        )
    }

    /// Suppress chunk emission. Encoder output keeps accumulating.
    pub fn pause(&self) {
        let _ = self.control.send(ChunkerControl::Paused);
    }

    /// Resume chunk emission after a pause.
    pub fn resume(&self) {
        let _ = self.control.send(ChunkerControl::Running);
    }

    pub fn is_paused(&self) -> bool {
        *self.control.borrow() == ChunkerControl::Paused
    }

    /// Stop the sequence, flushing any residual buffered data as one final
    /// chunk (which may be empty).
    pub async fn stop(mut self) -> Chunk {
        let _ = self.control.send(ChunkerControl::Stopped);
        match self.task.take() {
            Some(task) => task.await.unwrap_or(Chunk {
                data: Bytes::new(),
                produced_at: SystemTime::now(),
                is_final: true,
            }),
            None => Chunk {
                data: Bytes::new(),
                produced_at: SystemTime::now(),
                is_final: true,
            },
        }
    }
}

impl Drop for Chunker {
    fn drop(&mut self) {
        let _ = self.control.send(ChunkerControl::Stopped);
    }
}
