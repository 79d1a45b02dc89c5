use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::app::AppLocal;
use crate::bridge::EngineFactory;
use crate::captures::{BackendJson, CaptureCreate, CaptureManager};
use crate::config::Config;
use crate::sandbox::EmbeddingEngine;
use crate::semantic::{ExpansionFuture, QueryExpander};
use crate::storage;

mod app;
mod bridge;
mod web;

/// Config with short delays, safe for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.backfill_delay_ms = 1;
    config.relay_timeout_secs = 5;
    config
}

/// Creates an isolated capture store inside `tmp`.
pub fn create_store(tmp: &tempfile::TempDir) -> Arc<dyn CaptureManager> {
    let storage_mgr = Arc::new(
        storage::BackendLocal::new(tmp.path()).expect("failed to create storage"),
    );
    Arc::new(BackendJson::load(storage_mgr, "captures.json").expect("failed to load store"))
}

pub fn fallback_factory() -> EngineFactory {
    Arc::new(EmbeddingEngine::fallback_only)
}

/// Creates an isolated AppLocal on the fallback engine.
/// Must be called from within a tokio runtime.
pub fn create_app(
    expander: Option<Arc<dyn QueryExpander>>,
) -> (Arc<AppLocal>, Arc<dyn CaptureManager>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = create_store(&tmp);
    let app = AppLocal::new_with(test_config(), store.clone(), fallback_factory(), expander)
        .expect("failed to create app");
    (Arc::new(app), store, tmp)
}

pub fn capture_create(url: &str, title: &str, dom_text: &str, screenshot: &[u8]) -> CaptureCreate {
    CaptureCreate {
        timestamp: crate::captures::now_ms(),
        url: url.to_string(),
        title: title.to_string(),
        favicon: None,
        screenshot: screenshot.to_vec(),
        dom_text: dom_text.to_string(),
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Expander with a fixed answer.
pub struct StaticExpander(pub Vec<&'static str>);

impl QueryExpander for StaticExpander {
    fn expand<'a>(&'a self, _query: &'a str) -> ExpansionFuture<'a> {
        let terms = self.0.iter().map(|t| t.to_string()).collect();
        Box::pin(async move { Ok(terms) })
    }
}
