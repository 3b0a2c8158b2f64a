use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied by the capture platform")]
    PermissionDenied,

    #[error("Device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("No device of kind {kind} is available")]
    NoDeviceOfKind { kind: String },

    #[error("Capture backend error: {message}")]
    BackendError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Handshake failed: {reason}")]
    HandshakeFailed { reason: String },

    #[error("Transport closed: {reason}")]
    TransportClosed { reason: String },

    #[error("Outbound buffer at risk of overflow: {buffered} bytes buffered")]
    BufferOverflowRisk { buffered: u64 },

    #[error("Invalid ingest URL: {url}")]
    InvalidUrl { url: String },

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Retry limit exceeded after {attempts} reconnect attempts")]
    RetryLimitExceeded { attempts: u32 },

    #[error("A capture stream is required before publishing can start")]
    NoCaptureStream,

    #[error("A publish attempt is already active")]
    AlreadyPublishing,

    #[error("Publish connection is no longer running")]
    ConnectionGone,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Playback engine initialization failed: {reason}")]
    EngineInitFailed { reason: String },

    #[error("No playback session is attached")]
    NotAttached,

    #[error("Playback engine reset failed: {reason}")]
    ResetFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {message}")]
    ReadFailed { message: String },

    #[error("Failed to write config file: {message}")]
    WriteFailed { message: String },

    #[error("Failed to parse config file: {message}")]
    ParseFailed { message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

// Top-level application error type
#[derive(Error, Debug)]
pub enum PublisherError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Component initialization failed: {component}")]
    ComponentInitializationFailed { component: String },
}
