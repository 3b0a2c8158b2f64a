#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::sync::broadcast;

    use crate::config::{IngestConfig, PublishConfig};
    use crate::mock_ingest::MockIngestServer;
    use crate::publish::PublishConnection;
    use crate::transport::WebSocketIngestTransport;
    use crate::types::{ConnectionState, SessionCredentials};

    fn ingest_config(server: &MockIngestServer) -> IngestConfig {
        IngestConfig {
            override_base: Some(server.base_url()),
            ..IngestConfig::default()
        }
    }

    fn publish_config() -> PublishConfig {
        PublishConfig {
            chunk_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_millis(200),
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(200),
            max_retries: 5,
            ..PublishConfig::default()
        }
    }

    fn credentials(token: &str) -> SessionCredentials {
        SessionCredentials {
            session_id: "loop-session".to_string(),
            auth_token: token.to_string(),
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if cond() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_loopback_publish_delivers_binary_frames() {
        let server = MockIngestServer::bind("127.0.0.1:0", Some("secret".to_string()))
            .await
            .unwrap();

        let (feed, _keep) = broadcast::channel(16);
        let connection = PublishConnection::start(
            Arc::new(WebSocketIngestTransport::new()),
            &ingest_config(&server),
            &publish_config(),
            &credentials("secret"),
            feed.clone(),
            Vec::new(),
        );

        let state = connection.state();
        wait_for(|| *state.borrow() == ConnectionState::Publishing).await;
        assert_eq!(server.stats().rejected_handshakes, 0);

        feed.send(Bytes::from_static(b"live media payload")).unwrap();
        wait_for(|| server.stats().binary_bytes >= 18).await;
        assert!(server.stats().binary_frames >= 1);

        connection.stop().await;
        assert_eq!(connection.current_state(), ConnectionState::Idle);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_loopback_reconnects_after_server_drop() {
        let server = MockIngestServer::bind("127.0.0.1:0", None).await.unwrap();

        let (feed, _keep) = broadcast::channel(16);
        let connection = PublishConnection::start(
            Arc::new(WebSocketIngestTransport::new()),
            &ingest_config(&server),
            &publish_config(),
            &credentials("any"),
            feed.clone(),
            Vec::new(),
        );

        let state = connection.state();
        wait_for(|| *state.borrow() == ConnectionState::Publishing).await;
        assert_eq!(server.stats().connections, 1);

        server.drop_all();
        wait_for(|| server.stats().connections >= 2).await;
        wait_for(|| *state.borrow() == ConnectionState::Publishing).await;

        // The revived connection still carries media
        let frames_before = server.stats().binary_frames;
        feed.send(Bytes::from_static(b"after reconnect")).unwrap();
        wait_for(|| server.stats().binary_frames > frames_before).await;

        connection.stop().await;
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_loopback_bad_token_exhausts_retries() {
        let server = MockIngestServer::bind("127.0.0.1:0", Some("secret".to_string()))
            .await
            .unwrap();

        let config = PublishConfig {
            max_retries: 2,
            ..publish_config()
        };
        let (feed, _keep) = broadcast::channel::<Bytes>(16);
        let connection = PublishConnection::start(
            Arc::new(WebSocketIngestTransport::new()),
            &ingest_config(&server),
            &config,
            &credentials("wrong"),
            feed,
            Vec::new(),
        );

        let state = connection.state();
        wait_for(|| *state.borrow() == ConnectionState::Failed).await;

        let stats = server.stats();
        assert_eq!(stats.connections, 0);
        // Initial attempt plus two retries, all refused before the upgrade
        assert_eq!(stats.rejected_handshakes, 3);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_loopback_keepalives_reach_server_as_text() {
        let server = MockIngestServer::bind("127.0.0.1:0", None).await.unwrap();

        let config = PublishConfig {
            keepalive_interval: Duration::from_millis(100),
            ..publish_config()
        };
        let (feed, _keep) = broadcast::channel::<Bytes>(16);
        let connection = PublishConnection::start(
            Arc::new(WebSocketIngestTransport::new()),
            &ingest_config(&server),
            &config,
            &credentials("any"),
            feed,
            Vec::new(),
        );

        let state = connection.state();
        wait_for(|| *state.borrow() == ConnectionState::Publishing).await;
        wait_for(|| server.stats().text_frames >= 2).await;

        connection.stop().await;
        server.shutdown().await;
    }
}
