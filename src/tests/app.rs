use std::sync::Arc;
use std::time::Duration;

use crate::app::{AppBackend, AppLocal, Message, Reply};
use crate::capture::{CaptureOutcome, PageInfo, PushedPage};
use crate::captures::now_ms;
use crate::semantic::{ExpansionError, ExpansionFuture, QueryExpander};

use super::{
    capture_create, create_app, create_store, fallback_factory, test_config, wait_until,
    StaticExpander,
};

struct FailingExpander;

impl QueryExpander for FailingExpander {
    fn expand<'a>(&'a self, _query: &'a str) -> ExpansionFuture<'a> {
        Box::pin(async {
            Err(ExpansionError::Status {
                status: 503,
                body: "overloaded".to_string(),
            })
        })
    }
}

#[tokio::test]
async fn test_expansion_reaches_keyword_search() {
    let (app, store, _tmp) = create_app(Some(Arc::new(StaticExpander(vec!["bmw", "vehicle"]))));

    store
        .create(capture_create(
            "https://motors.example/m3",
            "BMW M3 track test",
            "the m3 laps the ring",
            b"1",
        ))
        .unwrap();
    store
        .create(capture_create("https://food.example", "Banana bread", "flour", b"2"))
        .unwrap();

    let reply = app.search("car", false).await.unwrap();
    assert!(!reply.semantic);
    let titles: Vec<&str> = reply.results.iter().map(|r| r.capture.title.as_str()).collect();
    assert_eq!(titles, vec!["BMW M3 track test"]);
    assert!(reply.results[0].search_score.is_some());
}

#[tokio::test]
async fn test_plain_keyword_search_without_expansions() {
    let (app, store, _tmp) = create_app(Some(Arc::new(FailingExpander)));

    store
        .create(capture_create("https://zoo.example", "Lions", "big cats", b"1"))
        .unwrap();

    let reply = app.search("lions", false).await.unwrap();
    assert!(!reply.semantic);
    assert_eq!(reply.results.len(), 1);
    assert_eq!(reply.results[0].search_score, None);

    assert!(app.search("car", false).await.unwrap().results.is_empty());
}

#[tokio::test]
async fn test_semantic_search_builds_index_on_demand() {
    let (app, store, _tmp) = create_app(None);

    let created = store
        .create(capture_create("https://zoo.example", "Lions", "big cats", b"1"))
        .unwrap();
    let query = app.bridge().embed_query("Lions").await.unwrap();
    store.complete(created.id, Some(query)).unwrap();

    let reply = app.search("Lions", true).await.unwrap();
    assert!(reply.semantic);
    assert_eq!(reply.results.len(), 1);
    let score = reply.results[0].search_score.unwrap();
    assert!((score - 200.0).abs() < 0.1);
}

#[tokio::test]
async fn test_delete_all_clears_store_and_index() {
    let (app, _store, _tmp) = create_app(None);
    app.start();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let app = &app;
            async move { app.stats().await.map(|s| s.index_built).unwrap_or(false) }
        })
        .await
    );

    for frame in [b"frame-1", b"frame-2"] {
        app.surface().update(PushedPage {
            info: PageInfo {
                url: "https://zoo.example/lions".to_string(),
                title: "Lions".to_string(),
                favicon: None,
            },
            screenshot: Some(frame.to_vec()),
            dom_text: "lions hunt at dusk".to_string(),
        });
        let outcome = app.capture_now(false).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Captured { .. }));
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            let app = &app;
            async move { app.stats().await.map(|s| s.indexed == 2).unwrap_or(false) }
        })
        .await
    );

    let reply = app.handle(Message::DeleteAll).await.unwrap();
    assert!(matches!(reply, Reply::Deleted { success: true, deleted: 2 }));

    let stats = app.stats().await.unwrap();
    assert_eq!(stats.store.total, 0);
    assert_eq!(stats.indexed, 0);

    app.shutdown().await;
}

#[tokio::test]
async fn test_message_dispatch() {
    let (app, store, _tmp) = create_app(None);

    let reply = app.handle(Message::GetCapture { id: 42 }).await.unwrap();
    assert!(matches!(reply, Reply::Capture { capture: None }));

    let mut old = capture_create("https://old.example", "old", "", b"old");
    old.timestamp = now_ms() - 3 * 24 * 60 * 60 * 1000;
    let old = store.create(old).unwrap();
    store
        .create(capture_create("https://new.example", "new", "", b"new"))
        .unwrap();

    let reply = app.handle(Message::GetCapture { id: old.id }).await.unwrap();
    assert!(matches!(reply, Reply::Capture { capture: Some(c) } if c.title == "old"));

    let reply = app.handle(Message::Purge { days: Some(1) }).await.unwrap();
    assert!(matches!(reply, Reply::Deleted { deleted: 1, .. }));

    let reply = app.handle(Message::GetStats).await.unwrap();
    let Reply::Stats { stats } = reply else {
        panic!("expected stats");
    };
    assert_eq!(stats.store.total, 1);
    assert!(!stats.index_built);

    let reply = app
        .handle(Message::CaptureNow { force: true })
        .await
        .unwrap();
    assert!(matches!(reply, Reply::Captured { success: true, .. }));
}

#[tokio::test]
async fn test_delete_all_during_backfill_leaves_new_captures_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let store = create_store(&tmp);
    for i in 0..3u8 {
        store
            .create(capture_create(
                &format!("https://old.example/{i}"),
                &format!("old {i}"),
                "text from before the wipe",
                &[i],
            ))
            .unwrap();
    }

    let mut config = test_config();
    config.backfill_delay_ms = 300;
    let app = Arc::new(AppLocal::new_with(config, store.clone(), fallback_factory(), None).unwrap());
    app.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    app.delete_all().await.unwrap();

    let mut fresh = Vec::new();
    for i in 0..3u8 {
        let created = store
            .create(capture_create(
                &format!("https://new.example/{i}"),
                &format!("new {i}"),
                "text from after the wipe",
                &[10 + i],
            ))
            .unwrap();
        fresh.push(created.id);
    }
    assert!(fresh.iter().all(|id| *id > 3));

    // long enough for the old back-fill pass to have finished
    tokio::time::sleep(Duration::from_millis(1000)).await;

    for id in fresh {
        let capture = store.get(id).unwrap().unwrap();
        assert!(!capture.processed, "capture {id} got stale analysis");
        assert_eq!(capture.embedding, None);
    }
    assert_eq!(app.stats().await.unwrap().indexed, 0);

    app.shutdown().await;
}
