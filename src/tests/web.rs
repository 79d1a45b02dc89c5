use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::web::router;

use super::create_app;

async fn call(router: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (app, _store, _tmp) = create_app(None);
    let (status, body) = call(router(app), "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_push_then_capture() {
    let (app, store, _tmp) = create_app(None);

    let page = json!({
        "url": "https://zoo.example/lions",
        "title": "Lions",
        "screenshot": STANDARD.encode(b"frame"),
        "dom_text": "lions hunt at dusk",
    });
    let (status, _) = call(router(app.clone()), "POST", "/api/surface", Some(page)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        router(app.clone()),
        "POST",
        "/api/message",
        Some(json!({"action": "capture_now"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["outcome"]["status"], json!("captured"));

    let id = body["outcome"]["id"].as_u64().unwrap();
    assert_eq!(store.get(id).unwrap().unwrap().title, "Lions");

    let (status, body) = call(router(app.clone()), "POST", "/api/capture_now", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["reason"], json!("duplicate"));

    let (status, body) = call(router(app), "GET", &format!("/api/captures/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["screenshot"], json!(STANDARD.encode(b"frame")));
}

#[tokio::test]
async fn test_errors_are_json() {
    let (app, _store, _tmp) = create_app(None);

    let (status, body) = call(router(app.clone()), "GET", "/api/captures/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "capture not found"}));

    let page = json!({"url": "https://zoo.example", "screenshot": "not base64!"});
    let (status, body) = call(router(app), "POST", "/api/surface", Some(page)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_search_and_stats_routes() {
    let (app, store, _tmp) = create_app(None);
    store
        .create(super::capture_create("https://zoo.example", "Lions", "big cats", b"1"))
        .unwrap();

    let (status, body) = call(
        router(app.clone()),
        "POST",
        "/api/search",
        Some(json!({"query": "cats"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["semantic"], json!(false));
    assert_eq!(body["results"][0]["title"], json!("Lions"));

    let (status, body) = call(router(app.clone()), "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], json!(1));

    let (status, body) = call(
        router(app),
        "POST",
        "/api/embed_query",
        Some(json!({"text": "lions"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vector"].as_array().map(|v| v.len()), Some(384));
}

#[tokio::test]
async fn test_navigation_notifies_scheduler() {
    let (app, _store, _tmp) = create_app(None);

    let (status, body) = call(
        router(app.clone()),
        "POST",
        "/api/surface/navigated",
        Some(json!({"url": "https://zoo.example", "title": "Zoo"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (status, _) = call(router(app.clone()), "POST", "/api/surface/focused", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(router(app.clone()), "DELETE", "/api/surface", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(router(app), "POST", "/api/capture_now", None).await;
    assert_eq!(body["outcome"]["reason"], json!("no_active_page"));
}

#[tokio::test]
async fn test_next_event_reports_capture() {
    let (app, _store, _tmp) = create_app(None);

    let waiting = tokio::spawn(call(router(app.clone()), "GET", "/api/events/next", None));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let page = json!({
        "url": "https://zoo.example/lions",
        "title": "Lions",
        "screenshot": STANDARD.encode(b"frame"),
    });
    call(router(app.clone()), "POST", "/api/surface", Some(page)).await;
    let (_, body) = call(router(app), "POST", "/api/capture_now", None).await;
    let id = body["outcome"]["id"].clone();

    let (status, body) = waiting.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"]["event"], json!("added"));
    assert_eq!(body["event"]["id"], id);
}
