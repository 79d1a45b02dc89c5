use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::bridge::{AnalysisComplete, WorkerBridge};
use crate::captures::{now_ms, with_store, CaptureCreate, CaptureManager, StoreError};
use crate::capture::{CapturePolicy, Surface};
use crate::semantic::{embedding_input, SemanticSearch};

const EVENTS_CAPACITY: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("surface error: {0:#}")]
    Surface(anyhow::Error),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoActivePage,
    Excluded,
    NoScreenshot,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Captured { id: u64 },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaptureEvent {
    Added { id: u64, timestamp: i64 },
    Processed { id: u64, has_embedding: bool },
}

/// Decides when the active page is snapshotted, persists the snapshot and
/// hands its text to the bridge.
pub struct CaptureOrchestrator {
    store: Arc<dyn CaptureManager>,
    surface: Arc<dyn Surface>,
    bridge: Arc<WorkerBridge>,
    search: Arc<SemanticSearch>,
    policy: CapturePolicy,
    text_limit: usize,
    events: broadcast::Sender<CaptureEvent>,
    /// Serializes captures so deduplication sees the previous write
    capture_lock: Mutex<()>,
}

impl CaptureOrchestrator {
    pub fn new(
        store: Arc<dyn CaptureManager>,
        surface: Arc<dyn Surface>,
        bridge: Arc<WorkerBridge>,
        search: Arc<SemanticSearch>,
        policy: CapturePolicy,
        text_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            store,
            surface,
            bridge,
            search,
            policy,
            text_limit,
            events,
            capture_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Snapshots the active page unless one of the skip rules applies.
    ///
    /// Skip rules, in order: no active page or an excluded URL, no
    /// screenshot, screenshot byte-identical to the last stored capture.
    /// `force` marks a user request; deduplication still applies to it.
    pub async fn capture_active_surface(&self, force: bool) -> Result<CaptureOutcome, CaptureError> {
        let _guard = self.capture_lock.lock().await;

        let Some(page) = self
            .surface
            .snapshot()
            .await
            .map_err(CaptureError::Surface)?
        else {
            return Ok(skipped(SkipReason::NoActivePage));
        };

        if !self.policy.allows(&page.info.url) {
            log::trace!("not capturing excluded url {}", page.info.url);
            return Ok(skipped(SkipReason::Excluded));
        }

        let screenshot = match page.screenshot {
            Some(screenshot) if !screenshot.is_empty() => screenshot,
            _ => {
                log::debug!("skipping capture, screenshot unavailable");
                return Ok(skipped(SkipReason::NoScreenshot));
            }
        };

        let last = with_store(&self.store, |store| store.last())
            .await
            .map_err(CaptureError::Store)?;
        if last.as_ref().is_some_and(|l| l.screenshot == screenshot) {
            log::debug!("capture is identical to the previous one, skipping (force: {force})");
            return Ok(skipped(SkipReason::Duplicate));
        }

        // never go backwards, even if the clock does
        let timestamp = now_ms().max(last.map(|l| l.timestamp).unwrap_or(i64::MIN));

        let create = CaptureCreate {
            timestamp,
            url: page.info.url,
            title: page.info.title,
            favicon: page.info.favicon,
            screenshot,
            dom_text: page.dom_text,
        };
        let capture = with_store(&self.store, move |store| store.create(create))
            .await
            .map_err(CaptureError::Store)?;

        let _ = self.events.send(CaptureEvent::Added {
            id: capture.id,
            timestamp: capture.timestamp,
        });
        log::info!("captured {} (id: {})", capture.title, capture.id);

        let text = embedding_input(&capture.title, &capture.url, &capture.dom_text, self.text_limit);
        if let Err(e) = self.bridge.submit(capture.id, text).await {
            log::warn!("capture {} stays unprocessed until the next back-fill: {e}", capture.id);
        }

        Ok(CaptureOutcome::Captured { id: capture.id })
    }

    /// One scheduler tick. Failures are logged and the tick is abandoned.
    pub async fn run_tick(&self, force: bool) -> Option<CaptureOutcome> {
        match self.capture_active_surface(force).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                log::error!("capture failed: {e}");
                None
            }
        }
    }

    /// Writes an analysis result to the store and the index.
    pub async fn apply_analysis(&self, analysis: AnalysisComplete) {
        let id = analysis.id;
        let embedding = analysis.embedding;

        let result = with_store(&self.store, move |store| store.complete(id, embedding)).await;
        let capture = match result {
            Ok(capture) => capture,
            Err(e) => {
                match e.downcast_ref::<StoreError>() {
                    Some(StoreError::AlreadyProcessed(_)) => {
                        log::debug!("capture {id} was already processed, ignoring result")
                    }
                    Some(StoreError::NotFound(_)) => {
                        log::debug!("capture {id} no longer exists, ignoring result")
                    }
                    None => log::error!("failed to store analysis of capture {id}: {e:#}"),
                }
                return;
            }
        };

        if let Err(e) = self.search.add_to_index(&capture) {
            log::error!("failed to index capture {id}: {e}");
        }

        let _ = self.events.send(CaptureEvent::Processed {
            id,
            has_embedding: capture.embedding.is_some(),
        });
    }

    /// Subscribes to the bridge's completions and applies each one.
    ///
    /// The subscription is taken before this returns, so no completion of
    /// work submitted afterwards is missed.
    pub fn spawn_completion_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut completions = self.bridge.completions();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            loop {
                match completions.recv().await {
                    Ok(analysis) => orchestrator.apply_analysis(analysis).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("missed {missed} analysis results, they are back-filled on next start");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn skipped(reason: SkipReason) -> CaptureOutcome {
    CaptureOutcome::Skipped { reason }
}
