use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::capture::Trigger;

pub type SurfaceFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Provenance of the page currently in front of the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub favicon: Option<String>,
}

/// The active browser page as seen by the orchestrator.
pub trait Surface: Send + Sync {
    /// Provenance, screenshot and text of the active page, read together so
    /// they always describe the same page. `None` when no page is active.
    fn snapshot(&self) -> SurfaceFuture<'_, Option<PushedPage>>;
}

/// Full page state, as pushed by the browser add-on.
#[derive(Debug, Clone, Default)]
pub struct PushedPage {
    pub info: PageInfo,
    pub screenshot: Option<Vec<u8>>,
    pub dom_text: String,
}

/// Surface fed over HTTP. Pushing a page after navigation or a focus change
/// also wakes the capture scheduler.
pub struct PushedSurface {
    page: RwLock<Option<PushedPage>>,
    triggers: mpsc::UnboundedSender<Trigger>,
}

impl PushedSurface {
    pub fn new(triggers: mpsc::UnboundedSender<Trigger>) -> Self {
        Self {
            page: RwLock::new(None),
            triggers,
        }
    }

    /// Replaces the current page state.
    pub fn update(&self, page: PushedPage) {
        *self.page.write().unwrap_or_else(|e| e.into_inner()) = Some(page);
    }

    /// Forgets the current page, e.g. when the browser lost all windows.
    pub fn clear(&self) {
        *self.page.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Records the page and schedules a capture.
    pub fn notify(&self, trigger: Trigger, page: Option<PushedPage>) {
        if let Some(page) = page {
            self.update(page);
        }
        if self.triggers.send(trigger).is_err() {
            log::debug!("capture scheduler is not running, {trigger:?} ignored");
        }
    }

}

impl Surface for PushedSurface {
    fn snapshot(&self) -> SurfaceFuture<'_, Option<PushedPage>> {
        let page = self.page.read().unwrap_or_else(|e| e.into_inner()).clone();
        Box::pin(async move { Ok(page) })
    }
}
