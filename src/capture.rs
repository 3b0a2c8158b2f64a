use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::errors::CaptureError;
use crate::types::{CaptureHints, DeviceDescriptor, DeviceKind, MediaFormat};

/// Capacity of the encoded-bytes fan-out channel shared between the live
/// preview and the Chunker.
const FEED_CAPACITY: usize = 256;

/// What to open. A present id must match exactly; an absent one means any
/// device of that kind is acceptable.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub camera_id: Option<String>,
    pub mic_id: Option<String>,
    pub hints: CaptureHints,
    pub format: MediaFormat,
}

/// A live track inside a capture stream. Stopping a track releases its share
/// of the hardware lock.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub descriptor: DeviceDescriptor,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Backend-owned resources behind an open capture stream.
pub struct CaptureHandle {
    pub tracks: Vec<MediaTrack>,
    pub feed: broadcast::Sender<Bytes>,
    /// Signals the backend to release the underlying device resources.
    pub shutdown: Option<oneshot::Sender<()>>,
}

/// Seam to the platform capture layer.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(&self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError>;

    /// Whether the backend can encode into the given container/codec format.
    fn supports_format(&self, format: &MediaFormat) -> bool;
}

/// A live handle to the active media tracks of one device selection. Owned
/// exclusively by its CaptureSession; only the session may terminate it.
pub struct CaptureStream {
    tracks: Vec<MediaTrack>,
    feed: broadcast::Sender<Bytes>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CaptureStream {
    fn new(handle: CaptureHandle) -> Self {
        Self {
            tracks: handle.tracks,
            feed: handle.feed,
            shutdown: handle.shutdown,
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// Shared-read access to the encoded byte feed (preview, Chunker).
    pub fn feed(&self) -> broadcast::Sender<Bytes> {
        self.feed.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.feed.subscribe()
    }

    pub fn is_fully_stopped(&self) -> bool {
        self.tracks.iter().all(|t| !t.is_live())
    }

    fn close_all(&mut self) {
        for track in &self.tracks {
            track.stop();
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // Backstop: a discarded stream must not keep the hardware locked.
        self.close_all();
    }
}

/// Opens and holds at most one capture stream at a time. Changing the device
/// selection always closes the previous stream (all tracks stopped) before a
/// new one is opened, on every exit path including errors.
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    hints: CaptureHints,
    format: MediaFormat,
    current: Option<CaptureStream>,
}

impl CaptureSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, hints: CaptureHints) -> Self {
        let format = MediaFormat::pick_supported(|f| backend.supports_format(f));
        Self {
            backend,
            hints,
            format,
            current: None,
        }
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn current(&self) -> Option<&CaptureStream> {
        self.current.as_ref()
    }

    /// Apply a device selection. The previous stream is fully closed first,
    /// even when opening the new selection fails.
    pub async fn select(
        &mut self,
        camera_id: Option<&str>,
        mic_id: Option<&str>,
    ) -> Result<&CaptureStream, CaptureError> {
        self.close();

        let request = CaptureRequest {
            camera_id: camera_id.map(str::to_string),
            mic_id: mic_id.map(str::to_string),
            hints: self.hints.clone(),
            format: self.format.clone(),
        };

        let handle = self.backend.open(&request).await?;
        info!(
            tracks = handle.tracks.len(),
            "capture stream opened ({})", self.format.0
        );
        self.current = Some(CaptureStream::new(handle));
        Ok(self.current.as_ref().unwrap())
    }

    /// Stop every track of the current stream and release the hardware.
    /// Safe to call when nothing is open.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.current.take() {
            stream.close_all();
            debug!("capture stream closed, all tracks stopped");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Capture backend driving ffmpeg as a child process: the selected devices go
/// in, one encoded container stream comes out on stdout.
pub struct FfmpegCaptureBackend {
    config: CaptureConfig,
}

impl FfmpegCaptureBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &CaptureRequest) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        let camera = request
            .camera_id
            .as_deref()
            .unwrap_or(&cfg.default_camera);
        cmd.arg("-f")
            .arg(&cfg.video_input_format)
            // Hints, not hard constraints: the device may deliver another mode.
            .arg("-framerate")
            .arg(request.hints.frame_rate.to_string())
            .arg("-video_size")
            .arg(format!("{}x{}", request.hints.width, request.hints.height))
            .arg("-i")
            .arg(camera);

        let mic = request.mic_id.as_deref().unwrap_or(&cfg.default_microphone);
        cmd.arg("-f").arg(&cfg.audio_input_format).arg("-i").arg(mic);

        match request.format.0 {
            f if f.contains("h264") => {
                cmd.arg("-c:v")
                    .arg("libx264")
                    .arg("-preset")
                    .arg("ultrafast")
                    .arg("-tune")
                    .arg("zerolatency");
            }
            _ => {
                cmd.arg("-c:v")
                    .arg("libvpx")
                    .arg("-deadline")
                    .arg("realtime");
            }
        }
        cmd.arg("-c:a").arg("libopus");

        cmd.arg("-f")
            .arg("webm")
            .arg("pipe:1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null());
        cmd
    }

    fn map_spawn_error(e: std::io::Error) -> CaptureError {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
            std::io::ErrorKind::NotFound => CaptureError::BackendError {
                message: "ffmpeg binary not found".to_string(),
            },
            _ => CaptureError::DeviceUnavailable {
                reason: e.to_string(),
            },
        }
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCaptureBackend {
    async fn open(&self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
        let mut cmd = self.build_command(request);
        let mut child = cmd.spawn().map_err(Self::map_spawn_error)?;

        let mut stdout = child.stdout.take().ok_or_else(|| CaptureError::BackendError {
            message: "ffmpeg stdout unavailable".to_string(),
        })?;

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let pump_feed = feed.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        break;
                    }
                    read = stdout.read(&mut buffer) => {
                        match read {
                            Ok(0) => {
                                debug!("capture process ended (EOF)");
                                break;
                            }
                            Ok(n) => {
                                // A send error only means nobody is listening
                                // right now; the feed stays usable.
                                let _ = pump_feed.send(Bytes::copy_from_slice(&buffer[..n]));
                            }
                            Err(e) => {
                                warn!("capture read failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            if let Err(e) = child.kill().await {
                debug!("capture process already gone: {}", e);
            }
            let _ = child.wait().await;
        });

        let camera_id = request
            .camera_id
            .clone()
            .unwrap_or_else(|| self.config.default_camera.clone());
        let mic_id = request
            .mic_id
            .clone()
            .unwrap_or_else(|| self.config.default_microphone.clone());

        let tracks = vec![
            MediaTrack::new(DeviceDescriptor {
                device_id: camera_id,
                kind: DeviceKind::Camera,
                label: String::new(),
            }),
            MediaTrack::new(DeviceDescriptor {
                device_id: mic_id,
                kind: DeviceKind::Microphone,
                label: String::new(),
            }),
        ];

        Ok(CaptureHandle {
            tracks,
            feed,
            shutdown: Some(shutdown_tx),
        })
    }

    fn supports_format(&self, format: &MediaFormat) -> bool {
        // libx264/libvpx/libopus cover the whole supported list.
        format.0.starts_with("video/webm")
    }
}
