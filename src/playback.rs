use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PlaybackConfig;
use crate::endpoint::manifest_url;
use crate::errors::PlaybackError;

/// Where decoded playback output goes. Opaque to the session; the engine
/// implementation knows how to render onto it.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    pub surface_id: String,
}

impl RenderSurface {
    pub fn new(surface_id: impl Into<String>) -> Self {
        Self {
            surface_id: surface_id.into(),
        }
    }
}

/// An adaptive-bitrate playback engine bound to one render surface.
///
/// `reset` must tear the engine back to a blank slate: source cleared,
/// buffers dropped, surface released. A reset engine is never reused.
pub trait AdaptiveEngine: Send {
    fn load(&mut self, manifest: &str) -> Result<(), PlaybackError>;

    fn reset(&mut self) -> Result<(), PlaybackError>;
}

/// Creates playback engines. One engine per attach; detach always destroys.
pub trait AdaptiveEngineFactory: Send + Sync {
    fn create(&self, surface: &RenderSurface) -> Result<Box<dyn AdaptiveEngine>, PlaybackError>;
}

/// Watches one live session's manifest on a render surface. At most one
/// engine exists at a time; re-attaching replaces it wholesale.
pub struct PlaybackSession {
    factory: Arc<dyn AdaptiveEngineFactory>,
    dasher_base: String,
    engine: Option<Box<dyn AdaptiveEngine>>,
    current_manifest: Option<String>,
}

impl PlaybackSession {
    pub fn new(factory: Arc<dyn AdaptiveEngineFactory>, config: &PlaybackConfig) -> Self {
        Self {
            factory,
            dasher_base: config.dasher_base.clone(),
            engine: None,
            current_manifest: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.engine.is_some()
    }

    /// Manifest URL currently loaded, if any.
    pub fn current_manifest(&self) -> Option<&str> {
        self.current_manifest.as_deref()
    }

    /// Start watching a session on the given surface. Any previous engine is
    /// fully reset first, so attach doubles as a switch between sessions.
    pub fn attach(
        &mut self,
        surface: &RenderSurface,
        session_id: &str,
    ) -> Result<(), PlaybackError> {
        self.detach()?;

        let manifest = manifest_url(&self.dasher_base, session_id);
        let mut engine = self.factory.create(surface)?;
        engine.load(&manifest)?;

        info!(%session_id, surface = %surface.surface_id, "playback attached");
        self.engine = Some(engine);
        self.current_manifest = Some(manifest);
        Ok(())
    }

    /// Stop watching and destroy the engine. Safe to call when nothing is
    /// attached.
    pub fn detach(&mut self) -> Result<(), PlaybackError> {
        if let Some(mut engine) = self.engine.take() {
            self.current_manifest = None;
            engine.reset()?;
            debug!("playback engine reset");
        }
        Ok(())
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        // Backstop: a dropped session must not leave an engine running.
        let _ = self.detach();
    }
}

/// Default engine: tracks the loaded manifest and logs transitions. Stands in
/// until a real decoder-backed engine is injected.
pub struct DefaultAdaptiveEngine {
    surface_id: String,
    manifest: Option<String>,
}

impl AdaptiveEngine for DefaultAdaptiveEngine {
    fn load(&mut self, manifest: &str) -> Result<(), PlaybackError> {
        info!(surface = %self.surface_id, "loading manifest {}", manifest);
        self.manifest = Some(manifest.to_string());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), PlaybackError> {
        self.manifest = None;
        Ok(())
    }
}

pub struct DefaultAdaptiveEngineFactory;

impl AdaptiveEngineFactory for DefaultAdaptiveEngineFactory {
    fn create(&self, surface: &RenderSurface) -> Result<Box<dyn AdaptiveEngine>, PlaybackError> {
        Ok(Box::new(DefaultAdaptiveEngine {
            surface_id: surface.surface_id.clone(),
            manifest: None,
        }))
    }
}
