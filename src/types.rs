use std::time::{Duration, SystemTime};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// Capture device kinds exposed by the enumerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Microphone,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Microphone => write!(f, "microphone"),
        }
    }
}

/// A single enumerated capture device. Immutable once listed; selection is
/// always by `device_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Result of a device enumeration pass. When the platform refuses both the
/// transient grant and enumeration, the lists are empty and `warning` carries
/// the condition instead of an error.
#[derive(Debug, Clone, Default)]
pub struct DeviceInventory {
    pub cameras: Vec<DeviceDescriptor>,
    pub microphones: Vec<DeviceDescriptor>,
    pub warning: Option<String>,
}

/// Externally issued session identity. Both fields are opaque to this crate.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub session_id: String,
    pub auth_token: String,
}

/// A container/codec identifier, ordered by preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat(pub &'static str);

/// Supported formats in preference order. The first one the capture backend
/// reports as supported wins.
pub const SUPPORTED_FORMATS: [MediaFormat; 3] = [
    MediaFormat("video/webm;codecs=h264,opus"),
    MediaFormat("video/webm;codecs=vp8,opus"),
    MediaFormat("video/webm"),
];

impl MediaFormat {
    /// Pick the first supported format, falling back to the plain container.
    pub fn pick_supported<F>(is_supported: F) -> MediaFormat
    where
        F: Fn(&MediaFormat) -> bool,
    {
        SUPPORTED_FORMATS
            .iter()
            .find(|f| is_supported(f))
            .cloned()
            .unwrap_or_else(|| SUPPORTED_FORMATS[2].clone())
    }
}

/// An opaque slice of encoded media. Ordering is implicit: chunks are
/// delivered in production order and the transport preserves it.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    pub produced_at: SystemTime,
    /// Set on the residual chunk flushed by `Chunker::stop`.
    pub is_final: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Connection lifecycle states of a publish attempt. `Failed` and `Idle` are
/// terminal for a given attempt-lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Publishing,
    BackoffWait,
    Closed,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Publishing => write!(f, "publishing"),
            ConnectionState::BackoffWait => write!(f, "backoff-wait"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Bounded exponential backoff. Attempt numbers start at 1.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(10000),
            max_retries: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.cap)
    }
}

/// High/low watermark gate on the outbound transport buffer.
#[derive(Debug, Clone)]
pub struct WatermarkPolicy {
    /// Pause chunk production when buffered-but-unsent bytes reach this level.
    pub high: u64,
    /// Resume production once the buffer drains below this level.
    pub low: u64,
    /// Buffer level poll interval while production is paused.
    pub drain_poll: Duration,
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        Self {
            high: 8 * 1024 * 1024,
            low: 1024 * 1024,
            drain_poll: Duration::from_millis(100),
        }
    }
}

/// Resolution and frame-rate hints for video capture. Hints only: the device
/// may deliver something else without failing the open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureHints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }
}
