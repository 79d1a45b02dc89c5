use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::storage::StorageManager;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// One observed page snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capture {
    pub id: u64,
    /// Epoch milliseconds
    pub timestamp: i64,

    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,

    #[serde(with = "base64_bytes")]
    pub screenshot: Vec<u8>,

    pub dom_text: String,
    pub extracted_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub processed: bool,
}

impl PartialEq for Capture {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptureCreate {
    pub timestamp: i64,
    pub url: String,
    pub title: String,
    pub favicon: Option<String>,
    pub screenshot: Vec<u8>,
    pub dom_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub total: usize,
    pub processed: usize,
    pub pending: usize,
    pub with_embedding: usize,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
    pub screenshot_bytes: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("capture {0} not found")]
    NotFound(u64),

    #[error("capture {0} was already processed")]
    AlreadyProcessed(u64),
}

/// Durable capture storage. The store is the single source of truth; every
/// other component holds transient copies.
pub trait CaptureManager: Send + Sync {
    fn create(&self, capture: CaptureCreate) -> anyhow::Result<Capture>;
    /// Moves a capture from unprocessed to processed, exactly once.
    fn complete(&self, id: u64, embedding: Option<Vec<f32>>) -> anyhow::Result<Capture>;
    fn get(&self, id: u64) -> anyhow::Result<Option<Capture>>;
    fn all(&self) -> anyhow::Result<Vec<Capture>>;
    fn last(&self) -> anyhow::Result<Option<Capture>>;
    fn search(&self, query: &str) -> anyhow::Result<Vec<Capture>>;
    fn delete_older_than(&self, days: u32, now_ms: i64) -> anyhow::Result<usize>;
    fn delete_all(&self) -> anyhow::Result<usize>;
    fn stats(&self) -> anyhow::Result<CaptureStats>;
}

/// Runs a store operation on the blocking pool.
pub async fn with_store<T, F>(store: &Arc<dyn CaptureManager>, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn CaptureManager) -> anyhow::Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("store task panicked")?
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    /// Id of the most recently stored capture, used for deduplication
    #[serde(default)]
    last_capture: Option<u64>,
    /// Next id to hand out. Never goes back, so ids stay unique across
    /// purges and bulk deletes
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    captures: Vec<Capture>,
}

impl StoreState {
    fn allocate_id(&self) -> u64 {
        let after_existing = self.captures.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        self.next_id.max(after_existing)
    }
}

/// JSON file backend. The whole state is rewritten atomically on every change.
pub struct BackendJson {
    state: RwLock<StoreState>,
    storage: Arc<dyn StorageManager>,
    file: String,
}

impl BackendJson {
    pub fn load(storage: Arc<dyn StorageManager>, file: &str) -> anyhow::Result<Self> {
        if !storage.exists(file) {
            log::info!("Creating new capture store at {file}");
            let empty = serde_json::to_vec(&StoreState::default())?;
            storage.write(file, &empty)?;
        }

        let data = storage.read(file)?;
        let state: StoreState =
            serde_json::from_slice(&data).with_context(|| format!("{file} is malformed"))?;

        log::debug!("loaded {} captures from {file}", state.captures.len());

        Ok(Self {
            state: RwLock::new(state),
            storage,
            file: file.to_string(),
        })
    }

    fn save(&self, state: &StoreState) -> anyhow::Result<()> {
        let data = serde_json::to_vec(state)?;
        self.storage.write(&self.file, &data)?;
        Ok(())
    }

    fn read_state(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| anyhow::anyhow!("capture store lock poisoned: {e}"))
    }

    fn write_state(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| anyhow::anyhow!("capture store lock poisoned: {e}"))
    }
}

impl CaptureManager for BackendJson {
    fn create(&self, create: CaptureCreate) -> anyhow::Result<Capture> {
        let mut state = self.write_state()?;

        let id = state.allocate_id();
        let capture = Capture {
            id,
            timestamp: create.timestamp,
            url: create.url,
            title: create.title,
            favicon: create.favicon,
            screenshot: create.screenshot,
            extracted_text: create.dom_text.clone(),
            dom_text: create.dom_text,
            embedding: None,
            processed: false,
        };

        let (last_capture, next_id) = (state.last_capture, state.next_id);
        state.captures.push(capture.clone());
        state.last_capture = Some(id);
        state.next_id = id + 1;

        if let Err(e) = self.save(&state) {
            state.captures.pop();
            state.last_capture = last_capture;
            state.next_id = next_id;
            return Err(e);
        }

        Ok(capture)
    }

    fn complete(&self, id: u64, embedding: Option<Vec<f32>>) -> anyhow::Result<Capture> {
        let mut state = self.write_state()?;

        let pos = state
            .captures
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if state.captures[pos].processed {
            return Err(StoreError::AlreadyProcessed(id).into());
        }

        state.captures[pos].processed = true;
        state.captures[pos].embedding = embedding;

        if let Err(e) = self.save(&state) {
            let capture = &mut state.captures[pos];
            capture.processed = false;
            capture.embedding = None;
            return Err(e);
        }

        Ok(state.captures[pos].clone())
    }

    fn get(&self, id: u64) -> anyhow::Result<Option<Capture>> {
        let state = self.read_state()?;
        Ok(state.captures.iter().find(|c| c.id == id).cloned())
    }

    fn all(&self) -> anyhow::Result<Vec<Capture>> {
        Ok(self.read_state()?.captures.clone())
    }

    fn last(&self) -> anyhow::Result<Option<Capture>> {
        let state = self.read_state()?;
        let Some(id) = state.last_capture else {
            return Ok(None);
        };
        Ok(state.captures.iter().find(|c| c.id == id).cloned())
    }

    /// Case-insensitive keyword search over title, url and page text,
    /// newest first. A capture matches when any query word occurs in it.
    fn search(&self, query: &str) -> anyhow::Result<Vec<Capture>> {
        let state = self.read_state()?;

        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let mut results: Vec<Capture> = state
            .captures
            .iter()
            .filter(|c| {
                if words.is_empty() {
                    return true;
                }
                let title = c.title.to_lowercase();
                let url = c.url.to_lowercase();
                let text = c.dom_text.to_lowercase();
                words
                    .iter()
                    .any(|w| title.contains(w) || url.contains(w) || text.contains(w))
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(results)
    }

    fn delete_older_than(&self, days: u32, now_ms: i64) -> anyhow::Result<usize> {
        let cutoff = now_ms - i64::from(days) * DAY_MS;
        let mut state = self.write_state()?;

        let deleted = state.captures.iter().filter(|c| c.timestamp < cutoff).count();
        if deleted == 0 {
            return Ok(0);
        }

        let captures: Vec<Capture> = state
            .captures
            .iter()
            .filter(|c| c.timestamp >= cutoff)
            .cloned()
            .collect();
        let last_capture = state
            .last_capture
            .filter(|last| captures.iter().any(|c| c.id == *last));
        let next = StoreState {
            last_capture,
            next_id: state.allocate_id(),
            captures,
        };

        self.save(&next)?;
        *state = next;
        Ok(deleted)
    }

    fn delete_all(&self) -> anyhow::Result<usize> {
        let mut state = self.write_state()?;
        let deleted = state.captures.len();

        let next = StoreState {
            next_id: state.allocate_id(),
            ..StoreState::default()
        };
        self.save(&next)?;
        *state = next;
        Ok(deleted)
    }

    fn stats(&self) -> anyhow::Result<CaptureStats> {
        let state = self.read_state()?;
        let captures = &state.captures;

        let processed = captures.iter().filter(|c| c.processed).count();
        Ok(CaptureStats {
            total: captures.len(),
            processed,
            pending: captures.len() - processed,
            with_embedding: captures.iter().filter(|c| c.embedding.is_some()).count(),
            oldest_timestamp: captures.iter().map(|c| c.timestamp).min(),
            newest_timestamp: captures.iter().map(|c| c.timestamp).max(),
            screenshot_bytes: captures.iter().map(|c| c.screenshot.len()).sum(),
        })
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
