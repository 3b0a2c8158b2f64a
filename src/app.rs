use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::capture::{CaptureBackend, CaptureSession, FfmpegCaptureBackend};
use crate::config::{AppConfig, ConfigManager, EnvConfigOverride};
use crate::devices::{DeviceEnumerator, FfmpegDeviceEnumerator};
use crate::errors::{PlaybackError, PublishError, PublisherError};
use crate::playback::{
    AdaptiveEngineFactory, DefaultAdaptiveEngineFactory, PlaybackSession, RenderSurface,
};
use crate::publish::{ConsolePublishEventHandler, PublishConnection, PublishEventHandler};
use crate::transport::{IngestTransport, WebSocketIngestTransport};
use crate::types::{ConnectionState, DeviceInventory, SessionCredentials};

/// Application builder for dependency injection and initialization
pub struct AppBuilder {
    config_path: Option<PathBuf>,
    custom_config: Option<AppConfig>,
    custom_backend: Option<Arc<dyn CaptureBackend>>,
    custom_enumerator: Option<Arc<dyn DeviceEnumerator>>,
    custom_transport: Option<Arc<dyn IngestTransport>>,
    custom_engine_factory: Option<Arc<dyn AdaptiveEngineFactory>>,
    event_handlers: Vec<Arc<dyn PublishEventHandler>>,
    enable_env_overrides: bool,
    enable_logging: bool,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config_path: None,
            custom_config: None,
            custom_backend: None,
            custom_enumerator: None,
            custom_transport: None,
            custom_engine_factory: None,
            event_handlers: Vec::new(),
            enable_env_overrides: true,
            enable_logging: true,
        }
    }

    /// Set configuration file path
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Set custom configuration
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.custom_config = Some(config);
        self
    }

    /// Set custom capture backend implementation
    pub fn with_capture_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.custom_backend = Some(backend);
        self
    }

    /// Set custom device enumerator implementation
    pub fn with_device_enumerator(mut self, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        self.custom_enumerator = Some(enumerator);
        self
    }

    /// Set custom ingest transport implementation
    pub fn with_transport(mut self, transport: Arc<dyn IngestTransport>) -> Self {
        self.custom_transport = Some(transport);
        self
    }

    /// Set custom playback engine factory
    pub fn with_engine_factory(mut self, factory: Arc<dyn AdaptiveEngineFactory>) -> Self {
        self.custom_engine_factory = Some(factory);
        self
    }

    /// Add an event handler
    pub fn with_event_handler(mut self, handler: Arc<dyn PublishEventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Enable or disable environment variable overrides
    pub fn with_env_overrides(mut self, enable: bool) -> Self {
        self.enable_env_overrides = enable;
        self
    }

    /// Disable the global logging setup (tests install their own)
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    /// Build the application
    pub async fn build(self) -> Result<PublisherApp, PublisherError> {
        let config = self.load_configuration().await?;

        if self.enable_logging {
            init_logging(&config.logging.level);
        }
        info!("Initializing live stream publisher");
        debug!("Configuration loaded successfully");

        let backend = self
            .custom_backend
            .clone()
            .unwrap_or_else(|| Arc::new(FfmpegCaptureBackend::new(config.capture.clone())));

        let enumerator = self
            .custom_enumerator
            .clone()
            .unwrap_or_else(|| Arc::new(FfmpegDeviceEnumerator::new(config.capture.clone())));

        let transport = self
            .custom_transport
            .clone()
            .unwrap_or_else(|| Arc::new(WebSocketIngestTransport::new()));

        let engine_factory = self
            .custom_engine_factory
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultAdaptiveEngineFactory));

        let mut event_handlers = self.event_handlers;
        if event_handlers.is_empty() {
            event_handlers.push(Arc::new(ConsolePublishEventHandler));
        }

        let capture = CaptureSession::new(backend, config.capture.hints.clone());
        let playback = PlaybackSession::new(engine_factory, &config.playback);

        info!("Application initialized successfully");

        Ok(PublisherApp {
            config,
            enumerator,
            transport,
            event_handlers,
            capture,
            playback,
            publish: None,
        })
    }

    async fn load_configuration(&self) -> Result<AppConfig, PublisherError> {
        let mut config = if let Some(custom_config) = &self.custom_config {
            custom_config.clone()
        } else {
            let config_path = self
                .config_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("live_publisher.toml"));

            let mut config_manager = ConfigManager::new(config_path);
            config_manager.load().await?;
            config_manager.get_config().clone()
        };

        if self.enable_env_overrides {
            EnvConfigOverride::apply_overrides(&mut config);
        }

        Ok(config)
    }
}

fn init_logging(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Main application structure: owns the capture session, at most one live
/// publish connection, and the playback session.
pub struct PublisherApp {
    config: AppConfig,
    enumerator: Arc<dyn DeviceEnumerator>,
    transport: Arc<dyn IngestTransport>,
    event_handlers: Vec<Arc<dyn PublishEventHandler>>,
    capture: CaptureSession,
    playback: PlaybackSession,
    publish: Option<PublishConnection>,
}

impl PublisherApp {
    /// Create a new application with default configuration
    pub async fn new() -> Result<Self, PublisherError> {
        AppBuilder::new().build().await
    }

    /// Create a new application with custom configuration file
    pub async fn with_config_file(config_path: PathBuf) -> Result<Self, PublisherError> {
        AppBuilder::new().with_config_path(config_path).build().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureSession {
        &self.capture
    }

    /// Enumerate cameras and microphones.
    pub async fn list_devices(&self) -> DeviceInventory {
        self.enumerator.list_devices().await
    }

    /// Open (or switch to) the given device selection. The previous stream is
    /// always fully closed first. When a publish is live, chunk production
    /// moves to the new stream without dropping the connection.
    pub async fn select_devices(
        &mut self,
        camera_id: Option<&str>,
        mic_id: Option<&str>,
    ) -> Result<(), PublisherError> {
        let stream = self.capture.select(camera_id, mic_id).await?;
        let feed = stream.feed();
        if let Some(publish) = &self.publish {
            publish.swap_stream(feed).await;
        }
        Ok(())
    }

    /// Start publishing the current capture stream under the given session
    /// credentials. Returns the publisher id for this publish lifetime.
    pub async fn start_publish(
        &mut self,
        credentials: SessionCredentials,
    ) -> Result<Uuid, PublisherError> {
        if let Some(existing) = &self.publish {
            match existing.current_state() {
                ConnectionState::Idle | ConnectionState::Failed => {}
                _ => return Err(PublishError::AlreadyPublishing.into()),
            }
        }

        let stream = self
            .capture
            .current()
            .ok_or(PublishError::NoCaptureStream)?;

        let connection = PublishConnection::start(
            self.transport.clone(),
            &self.config.ingest,
            &self.config.publish,
            &credentials,
            stream.feed(),
            self.event_handlers.clone(),
        );
        let publisher_id = connection.publisher_id();
        info!(session_id = %credentials.session_id, %publisher_id, "publishing started");
        self.publish = Some(connection);
        Ok(publisher_id)
    }

    /// Stop the live publish, if any. Idempotent.
    pub async fn stop_publish(&mut self) {
        if let Some(publish) = self.publish.take() {
            publish.stop().await;
            info!("publishing stopped");
        }
    }

    /// Current publish connection state; idle when nothing was ever started.
    pub fn publish_state(&self) -> ConnectionState {
        self.publish
            .as_ref()
            .map(|p| p.current_state())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Observation channel of the live publish, when one exists.
    pub fn publish_state_channel(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.publish.as_ref().map(|p| p.state())
    }

    /// Start watching a session on the given render surface.
    pub fn attach_playback(
        &mut self,
        surface: &RenderSurface,
        session_id: &str,
    ) -> Result<(), PlaybackError> {
        self.playback.attach(surface, session_id)
    }

    /// Stop watching. Safe when nothing is attached.
    pub fn detach_playback(&mut self) -> Result<(), PlaybackError> {
        self.playback.detach()
    }

    pub fn playback(&self) -> &PlaybackSession {
        &self.playback
    }

    /// Open the default devices, publish under the given credentials and run
    /// until ctrl-c.
    pub async fn run(&mut self, credentials: SessionCredentials) -> Result<(), PublisherError> {
        let inventory = self.list_devices().await;
        if let Some(warning) = &inventory.warning {
            tracing::warn!("{}", warning);
        }
        info!(
            cameras = inventory.cameras.len(),
            microphones = inventory.microphones.len(),
            "devices enumerated"
        );

        self.select_devices(None, None).await?;
        self.start_publish(credentials).await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| PublisherError::ComponentInitializationFailed {
                component: format!("shutdown signal listener: {}", e),
            })?;

        info!("Shutdown signal received, stopping application");
        self.shutdown().await;
        Ok(())
    }

    /// Graceful shutdown: final chunk flushed, transport closed, devices
    /// released, playback engine reset.
    pub async fn shutdown(&mut self) {
        self.stop_publish().await;
        self.capture.close();
        let _ = self.playback.detach();
        info!("Application shutdown complete");
    }
}
