use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{BridgeError, EngineFactory, WorkerBridge};
use crate::sandbox::{EmbeddingEngine, EmbeddingError, EMBEDDING_DIM};

use super::fallback_factory;

/// Engine whose model load takes `delay` and then fails.
fn slow_factory(delay: Duration) -> EngineFactory {
    Arc::new(move || {
        EmbeddingEngine::new(Arc::new(move || {
            std::thread::sleep(delay);
            Err(EmbeddingError::InitFailed("slow model".to_string()))
        }))
    })
}

#[tokio::test]
async fn test_embed_query_uses_fallback_vector() {
    let bridge = WorkerBridge::new(fallback_factory(), Duration::from_secs(5));

    let vector = bridge.embed_query("lions in the savanna").await.unwrap();
    assert_eq!(vector.len(), EMBEDDING_DIM);
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);

    let again = bridge.embed_query("lions in the savanna").await.unwrap();
    assert_eq!(vector, again);
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_timeout_evicts_pending_request() {
    let bridge = WorkerBridge::new(
        slow_factory(Duration::from_millis(500)),
        Duration::from_millis(50),
    );

    let err = bridge.ping().await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout(_)));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test]
async fn test_stale_generation_is_discarded() {
    let bridge = WorkerBridge::new(fallback_factory(), Duration::from_secs(5));
    let mut completions = bridge.completions();

    let stale = bridge.submit(1, "first page".to_string()).await.unwrap();
    assert_eq!(stale.status, "started");
    assert_eq!(bridge.invalidate(), 0);

    let fresh = bridge.submit(2, "second page".to_string()).await.unwrap();
    assert_eq!(fresh.generation, stale.generation + 1);

    let analysis = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(analysis.id, 2);
    assert_eq!(analysis.embedding.map(|e| e.len()), Some(EMBEDDING_DIM));
}

#[tokio::test]
async fn test_invalidate_cancels_waiting_callers() {
    let bridge = Arc::new(WorkerBridge::new(
        slow_factory(Duration::from_millis(200)),
        Duration::from_secs(5),
    ));

    let waiting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.ping().await }
    });

    assert!(
        super::wait_until(Duration::from_secs(2), || {
            let bridge = bridge.clone();
            async move { bridge.pending_count() == 1 }
        })
        .await
    );
    assert_eq!(bridge.invalidate(), 1);

    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(BridgeError::Cancelled)));
}

#[tokio::test]
async fn test_sandbox_created_once_and_recreated_after_shutdown() {
    let bridge = Arc::new(WorkerBridge::new(fallback_factory(), Duration::from_secs(5)));

    let mut pings = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let bridge = bridge.clone();
        pings.spawn(async move { bridge.ping().await });
    }
    while let Some(result) = pings.join_next().await {
        result.unwrap().unwrap();
    }

    assert_eq!(bridge.created_count(), 1);
    assert!(bridge.is_alive().await);

    bridge.shutdown().await;
    assert!(!bridge.is_alive().await);

    bridge.ping().await.unwrap();
    assert_eq!(bridge.created_count(), 2);
    assert!(bridge.is_alive().await);
}

#[tokio::test]
async fn test_empty_text_has_no_embedding() {
    let bridge = WorkerBridge::new(fallback_factory(), Duration::from_secs(5));
    let mut completions = bridge.completions();

    bridge.submit(7, "   ".to_string()).await.unwrap();

    let analysis = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(analysis.id, 7);
    assert_eq!(analysis.embedding, None);
}
