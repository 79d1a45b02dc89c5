//! Text embedding models.
//!
//! Only models producing 384-dimensional vectors are offered. Model files
//! are fetched by fastembed into `<cache_dir>/models` the first time a model
//! is loaded.

use std::path::Path;
use std::sync::Mutex;

use fastembed::{InitOptions, TextEmbedding};

/// Anything that turns text into a dense vector.
///
/// Implementations are blocking; the engine calls them on the blocking pool.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("cannot load embedding model: {0}")]
    InitFailed(String),

    #[error("cannot embed text: {0}")]
    EmbeddingFailed(String),

    #[error("unsupported embedding model {0:?}, use all-MiniLM-L6-v2 or bge-small-en-v1.5 (append -q for the quantized variant)")]
    InvalidModel(String),
}

/// Resolves a configured model name, ignoring case and punctuation.
fn resolve_model(name: &str) -> Option<fastembed::EmbeddingModel> {
    let key: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match key.as_str() {
        "allminilml6v2" => Some(fastembed::EmbeddingModel::AllMiniLML6V2),
        "allminilml6v2q" => Some(fastembed::EmbeddingModel::AllMiniLML6V2Q),
        "bgesmallenv15" => Some(fastembed::EmbeddingModel::BGESmallENV15),
        "bgesmallenv15q" => Some(fastembed::EmbeddingModel::BGESmallENV15Q),
        _ => None,
    }
}

/// fastembed `TextEmbedding` behind a lock, since its `embed` takes `&mut self`.
pub struct FastEmbedder {
    name: String,
    dimensions: usize,
    inner: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    /// Loads `name`, downloading it into `<cache_dir>/models` when missing,
    /// and measures its output width with a sample embedding.
    pub fn load(name: &str, cache_dir: &Path) -> Result<Self, EmbeddingError> {
        let model = resolve_model(name).ok_or_else(|| EmbeddingError::InvalidModel(name.to_string()))?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir)
            .map_err(|e| EmbeddingError::InitFailed(format!("{}: {e}", models_dir.display())))?;

        log::debug!("loading embedding model {name} from {}", models_dir.display());
        let mut inner = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(models_dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = inner
            .embed(vec!["width check"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("sample embedding failed: {e}")))?
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::InitFailed("sample embedding returned nothing".to_string()))?;

        Ok(Self {
            name: name.to_string(),
            dimensions,
            inner: Mutex::new(inner),
        })
    }
}

impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| EmbeddingError::EmbeddingFailed("model lock poisoned".to_string()))?;

        inner
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("model returned nothing".to_string()))
    }
}
