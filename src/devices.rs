use std::process::Stdio;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::errors::CaptureError;
use crate::types::{DeviceDescriptor, DeviceInventory, DeviceKind};

/// Lists available capture devices. Stateless, pure query.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// Enumerate cameras and microphones. Never fails: when the platform
    /// refuses both the transient grant and enumeration, the inventory is
    /// empty and carries a warning instead.
    async fn list_devices(&self) -> DeviceInventory;
}

/// Enumerates devices by probing the ffmpeg CLI (`-sources <format>`).
pub struct FfmpegDeviceEnumerator {
    config: CaptureConfig,
}

impl FfmpegDeviceEnumerator {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Best-effort transient grant: touch the default devices so the platform
    /// wakes them up and labels populate. Failure is not fatal.
    async fn request_transient_grant(&self) -> Result<(), CaptureError> {
        let status = Command::new(&self.config.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-f")
            .arg(&self.config.video_input_format)
            .arg("-list_formats")
            .arg("all")
            .arg("-i")
            .arg(&self.config.default_camera)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| CaptureError::BackendError {
                message: format!("ffmpeg probe failed to start: {}", e),
            })?;

        debug!("transient capture grant probe exited with {}", status);
        Ok(())
    }

    async fn list_sources(&self, input_format: &str) -> Result<String, CaptureError> {
        let output = Command::new(&self.config.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-sources")
            .arg(input_format)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CaptureError::BackendError {
                message: format!("ffmpeg -sources failed to start: {}", e),
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

#[async_trait]
impl DeviceEnumerator for FfmpegDeviceEnumerator {
    async fn list_devices(&self) -> DeviceInventory {
        let grant = self.request_transient_grant().await;
        if let Err(e) = &grant {
            debug!("transient grant refused: {}", e);
        }

        let cameras = self.list_sources(&self.config.video_input_format).await;
        let microphones = self.list_sources(&self.config.audio_input_format).await;

        match (cameras, microphones) {
            (Ok(cam_out), Ok(mic_out)) => DeviceInventory {
                cameras: parse_source_list(&cam_out, DeviceKind::Camera),
                microphones: parse_source_list(&mic_out, DeviceKind::Microphone),
                warning: None,
            },
            (cam, mic) => {
                let reason = cam.err().or(mic.err()).map(|e| e.to_string());
                warn!("device enumeration unavailable: {:?}", reason);
                DeviceInventory {
                    cameras: Vec::new(),
                    microphones: Vec::new(),
                    warning: Some(format!(
                        "device enumeration unavailable: {}",
                        reason.unwrap_or_else(|| "unknown".to_string())
                    )),
                }
            }
        }
    }
}

/// Parses `ffmpeg -sources` output of the shape:
///
/// ```text
/// Auto-detected sources for v4l2:
///   /dev/video0 [Integrated Camera] (default)
///   /dev/video2 [USB Camera]
/// ```
///
/// Lines without a bracketed label keep an empty label rather than being
/// dropped, mirroring enumeration without a capture grant.
pub fn parse_source_list(output: &str, kind: DeviceKind) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    for line in output.lines() {
        if !line.starts_with(char::is_whitespace) {
            continue;
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('*') {
            continue;
        }

        let (id, rest) = match line.split_once(char::is_whitespace) {
            Some((id, rest)) => (id, rest.trim()),
            None => (line, ""),
        };

        let label = rest
            .split_once('[')
            .and_then(|(_, tail)| tail.split_once(']'))
            .map(|(label, _)| label.to_string())
            .unwrap_or_default();

        devices.push(DeviceDescriptor {
            device_id: id.to_string(),
            kind,
            label,
        });
    }

    devices
}
