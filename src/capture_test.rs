#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use crate::capture::{
        CaptureBackend, CaptureHandle, CaptureRequest, CaptureSession, MediaTrack,
    };
    use crate::errors::CaptureError;
    use crate::types::{CaptureHints, DeviceDescriptor, DeviceKind, MediaFormat};

    /// Backend that fabricates tracks and records every open request.
    struct MockBackend {
        opens: AtomicUsize,
        fail_next: AtomicBool,
        issued_tracks: Mutex<Vec<MediaTrack>>,
        last_request: Mutex<Option<CaptureRequest>>,
        supported: &'static str,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                issued_tracks: Mutex::new(Vec::new()),
                last_request: Mutex::new(None),
                supported: "video/webm",
            }
        }

        fn with_supported(supported: &'static str) -> Self {
            Self {
                supported,
                ..Self::new()
            }
        }

        fn issued_tracks(&self) -> Vec<MediaTrack> {
            self.issued_tracks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CaptureBackend for MockBackend {
        async fn open(&self, request: &CaptureRequest) -> Result<CaptureHandle, CaptureError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable {
                    reason: "mock failure".to_string(),
                });
            }
            self.opens.fetch_add(1, Ordering::SeqCst);

            let tracks = vec![
                MediaTrack::new(DeviceDescriptor {
                    device_id: request
                        .camera_id
                        .clone()
                        .unwrap_or_else(|| "cam-default".to_string()),
                    kind: DeviceKind::Camera,
                    label: String::new(),
                }),
                MediaTrack::new(DeviceDescriptor {
                    device_id: request
                        .mic_id
                        .clone()
                        .unwrap_or_else(|| "mic-default".to_string()),
                    kind: DeviceKind::Microphone,
                    label: String::new(),
                }),
            ];
            self.issued_tracks.lock().unwrap().extend(tracks.clone());

            let (feed, _) = broadcast::channel(8);
            Ok(CaptureHandle {
                tracks,
                feed,
                shutdown: None,
            })
        }

        fn supports_format(&self, format: &MediaFormat) -> bool {
            format.0 == self.supported
        }
    }

    fn session(backend: Arc<MockBackend>) -> CaptureSession {
        CaptureSession::new(backend, CaptureHints::default())
    }

    #[tokio::test]
    async fn test_select_opens_live_tracks() {
        let backend = Arc::new(MockBackend::new());
        let mut session = session(backend.clone());

        let stream = session.select(Some("/dev/video2"), None).await.unwrap();
        assert_eq!(stream.tracks().len(), 2);
        assert!(stream.tracks().iter().all(|t| t.is_live()));

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.camera_id.as_deref(), Some("/dev/video2"));
        assert_eq!(request.mic_id, None);
    }

    #[tokio::test]
    async fn test_reselect_stops_previous_tracks_first() {
        let backend = Arc::new(MockBackend::new());
        let mut session = session(backend.clone());

        session.select(Some("cam-a"), Some("mic-a")).await.unwrap();
        session.select(Some("cam-b"), Some("mic-b")).await.unwrap();

        let issued = backend.issued_tracks();
        assert_eq!(issued.len(), 4);
        // First selection fully stopped, second fully live
        assert!(issued[..2].iter().all(|t| !t.is_live()));
        assert!(issued[2..].iter().all(|t| t.is_live()));
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_reselect_still_closes_previous() {
        let backend = Arc::new(MockBackend::new());
        let mut session = session(backend.clone());

        session.select(None, None).await.unwrap();
        backend.fail_next.store(true, Ordering::SeqCst);
        let result = session.select(Some("broken-cam"), None).await;

        assert!(matches!(result, Err(CaptureError::DeviceUnavailable { .. })));
        assert!(session.current().is_none());
        assert!(backend.issued_tracks().iter().all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = Arc::new(MockBackend::new());
        let mut session = session(backend.clone());

        session.select(None, None).await.unwrap();
        session.close();
        session.close();

        assert!(session.current().is_none());
        assert!(backend.issued_tracks().iter().all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_dropped_session_releases_tracks() {
        let backend = Arc::new(MockBackend::new());
        {
            let mut session = session(backend.clone());
            session.select(None, None).await.unwrap();
        }
        assert!(backend.issued_tracks().iter().all(|t| !t.is_live()));
    }

    #[tokio::test]
    async fn test_format_preference_order() {
        let h264 = Arc::new(MockBackend::with_supported("video/webm;codecs=h264,opus"));
        assert_eq!(session(h264).format().0, "video/webm;codecs=h264,opus");

        let vp8 = Arc::new(MockBackend::with_supported("video/webm;codecs=vp8,opus"));
        assert_eq!(session(vp8).format().0, "video/webm;codecs=vp8,opus");

        // Nothing matches: fall back to the plain container
        let none = Arc::new(MockBackend::with_supported("video/mp4"));
        assert_eq!(session(none).format().0, "video/webm");
    }
}
