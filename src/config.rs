use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::errors::ConfigError;
use crate::types::{BackoffPolicy, CaptureHints, WatermarkPolicy};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ingest endpoint settings
    pub ingest: IngestConfig,

    /// Publish pipeline settings (chunking, keepalive, backoff, backpressure)
    pub publish: PublishConfig,

    /// Device capture settings
    pub capture: CaptureConfig,

    /// Playback settings
    pub playback: PlaybackConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Override base for the ingest endpoint (`VITE_INGEST_URL`). When it
    /// already carries a ws/wss scheme it is used verbatim; otherwise the
    /// scheme is derived from `secure`.
    pub override_base: Option<String>,

    /// Ingest host used when no override base is configured
    pub host: String,

    /// Ingest port; defaults to 443 (secure) / 8080 (insecure) when absent
    pub port: Option<u16>,

    /// Whether the page/process origin is secure (`wss` vs `ws`)
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Chunk production interval
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub chunk_interval: Duration,

    /// Keepalive interval while the connection is idle of chunk traffic
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub keepalive_interval: Duration,

    /// Base delay of the exponential backoff
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub backoff_base: Duration,

    /// Backoff delay cap
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub backoff_cap: Duration,

    /// Maximum reconnect attempts before the attempt-lifetime fails
    pub max_retries: u32,

    /// High watermark on buffered-but-unsent transport bytes
    pub high_watermark: u64,

    /// Low watermark below which chunk production resumes
    pub low_watermark: u64,

    /// Buffer drain poll interval while production is paused
    #[serde(serialize_with = "crate::serde_helpers::serialize_duration")]
    #[serde(deserialize_with = "crate::serde_helpers::deserialize_duration")]
    pub drain_poll: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Video resolution/frame-rate hints (not hard constraints)
    pub hints: CaptureHints,

    /// ffmpeg input format for cameras (e.g. v4l2, avfoundation)
    pub video_input_format: String,

    /// ffmpeg input format for microphones (e.g. alsa, pulse)
    pub audio_input_format: String,

    /// Camera opened when no explicit id is selected
    pub default_camera: String,

    /// Microphone opened when no explicit id is selected
    pub default_microphone: String,

    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Base URL of the manifest service
    pub dasher_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            publish: PublishConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            override_base: None,
            host: "localhost".to_string(),
            port: None,
            secure: false,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_millis(1000),
            keepalive_interval: Duration::from_secs(15),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10000),
            max_retries: 5,
            high_watermark: 8 * 1024 * 1024,
            low_watermark: 1024 * 1024,
            drain_poll: Duration::from_millis(100),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            hints: CaptureHints::default(),
            video_input_format: "v4l2".to_string(),
            audio_input_format: "alsa".to_string(),
            default_camera: "/dev/video0".to_string(),
            default_microphone: "default".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            dasher_base: "http://localhost:8090".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PublishConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.backoff_base,
            cap: self.backoff_cap,
            max_retries: self.max_retries,
        }
    }

    pub fn watermark_policy(&self) -> WatermarkPolicy {
        WatermarkPolicy {
            high: self.high_watermark,
            low: self.low_watermark,
            drain_poll: self.drain_poll,
        }
    }
}

/// Configuration manager for loading, saving, and validating configurations
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            config: AppConfig::default(),
        }
    }

    /// Load configuration from file, creating a default file when none exists
    pub async fn load(&mut self) -> Result<(), ConfigError> {
        if !self.config_path.exists() {
            self.save().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| ConfigError::ReadFailed {
                message: e.to_string(),
            })?;

        self.config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            message: e.to_string(),
        })?;

        self.validate()?;
        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&self.config).map_err(|e| ConfigError::WriteFailed {
            message: e.to_string(),
        })?;

        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::WriteFailed {
                    message: e.to_string(),
                })?;
        }

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|e| ConfigError::WriteFailed {
                message: e.to_string(),
            })?;

        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn update_config(&mut self, config: AppConfig) -> Result<(), ConfigError> {
        self.config = config;
        self.validate()?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cfg = &self.config;

        if cfg.ingest.host.is_empty() {
            return Err(ConfigError::Invalid {
                message: "Ingest host cannot be empty".to_string(),
            });
        }

        if cfg.ingest.port == Some(0) {
            return Err(ConfigError::Invalid {
                message: "Ingest port must be greater than 0".to_string(),
            });
        }

        if cfg.publish.chunk_interval.is_zero() {
            return Err(ConfigError::Invalid {
                message: "Chunk interval must be greater than 0".to_string(),
            });
        }

        if cfg.publish.max_retries == 0 {
            return Err(ConfigError::Invalid {
                message: "Max retries must be greater than 0".to_string(),
            });
        }

        if cfg.publish.low_watermark >= cfg.publish.high_watermark {
            return Err(ConfigError::Invalid {
                message: "Low watermark must be below the high watermark".to_string(),
            });
        }

        if cfg.publish.drain_poll.is_zero() {
            return Err(ConfigError::Invalid {
                message: "Drain poll interval must be greater than 0".to_string(),
            });
        }

        if cfg.playback.dasher_base.is_empty() {
            return Err(ConfigError::Invalid {
                message: "Dasher base URL cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Environment-based configuration override
pub struct EnvConfigOverride;

impl EnvConfigOverride {
    /// Apply environment variable overrides to configuration
    pub fn apply_overrides(config: &mut AppConfig) {
        use std::env;

        if let Ok(base) = env::var("VITE_INGEST_URL") {
            let base = base.trim().to_string();
            if !base.is_empty() {
                config.ingest.override_base = Some(base);
            }
        }

        if let Ok(host) = env::var("PUBLISHER_INGEST_HOST") {
            config.ingest.host = host;
        }
        if let Ok(port) = env::var("PUBLISHER_INGEST_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.ingest.port = Some(port);
            }
        }
        if let Ok(secure) = env::var("PUBLISHER_SECURE") {
            config.ingest.secure = secure.to_lowercase() == "true";
        }

        if let Ok(base) = env::var("PUBLISHER_DASHER_BASE") {
            config.playback.dasher_base = base;
        }

        if let Ok(level) = env::var("PUBLISHER_LOG_LEVEL") {
            config.logging.level = level;
        }
    }
}
