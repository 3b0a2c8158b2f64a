#[cfg(test)]
mod tests {
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::sync::broadcast;

    use crate::chunker::Chunker;

    const INTERVAL: Duration = Duration::from_millis(100);

    // Paused-clock runtimes auto-advance when every task is idle, so a short
    // sleep doubles as "let the chunker drain its feed".
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_buffered_bytes_on_tick() {
        let (feed, _keep) = broadcast::channel(16);
        let (chunker, mut chunks) = Chunker::start(&feed, INTERVAL);

        feed.send(Bytes::from_static(b"hello ")).unwrap();
        feed.send(Bytes::from_static(b"world")).unwrap();

        let chunk = chunks.recv().await.unwrap();
        assert_eq!(&chunk.data[..], b"hello world");
        assert!(!chunk.is_final);

        drop(chunker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_ticks_emit_nothing() {
        let (feed, _keep) = broadcast::channel::<Bytes>(16);
        let (chunker, mut chunks) = Chunker::start(&feed, INTERVAL);

        // Several intervals pass with no encoder output
        let waited =
            tokio::time::timeout(Duration::from_millis(450), chunks.recv()).await;
        assert!(waited.is_err());

        drop(chunker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_suppresses_without_losing_bytes() {
        let (feed, _keep) = broadcast::channel(16);
        let (chunker, mut chunks) = Chunker::start(&feed, INTERVAL);

        chunker.pause();
        settle().await;
        assert!(chunker.is_paused());

        feed.send(Bytes::from_static(b"buffered")).unwrap();
        let while_paused =
            tokio::time::timeout(Duration::from_millis(350), chunks.recv()).await;
        assert!(while_paused.is_err());

        chunker.resume();
        let chunk = chunks.recv().await.unwrap();
        assert_eq!(&chunk.data[..], b"buffered");

        drop(chunker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_residual_as_final_chunk() {
        let (feed, _keep) = broadcast::channel(16);
        let (chunker, mut chunks) = Chunker::start(&feed, INTERVAL);

        chunker.pause();
        settle().await;
        feed.send(Bytes::from_static(b"tail")).unwrap();
        settle().await;

        let final_chunk = chunker.stop().await;
        assert!(final_chunk.is_final);
        assert_eq!(&final_chunk.data[..], b"tail");

        // The same final chunk is also offered on the chunk channel
        let from_channel = chunks.recv().await.unwrap();
        assert!(from_channel.is_final);
        assert_eq!(&from_channel.data[..], b"tail");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_empty_buffer_yields_empty_final() {
        let (feed, _keep) = broadcast::channel::<Bytes>(16);
        let (chunker, _chunks) = Chunker::start(&feed, INTERVAL);
        settle().await;

        let final_chunk = chunker.stop().await;
        assert!(final_chunk.is_final);
        assert!(final_chunk.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_preserves_production_order() {
        let (feed, _keep) = broadcast::channel(16);
        let (chunker, mut chunks) = Chunker::start(&feed, INTERVAL);

        feed.send(Bytes::from_static(b"one")).unwrap();
        let first = chunks.recv().await.unwrap();

        feed.send(Bytes::from_static(b"two")).unwrap();
        let second = chunks.recv().await.unwrap();

        assert_eq!(&first.data[..], b"one");
        assert_eq!(&second.data[..], b"two");
        assert!(first.produced_at <= second.produced_at);

        drop(chunker);
    }
}
