use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::config::SemanticSearchConfig;
use crate::sandbox::embeddings::{Embedder, EmbeddingError, FastEmbedder};
use crate::sandbox::fallback::{fallback_embedding, l2_normalize};
use crate::sandbox::EMBEDDING_DIM;

/// Produces the model. Runs on the blocking pool, at most once per engine.
pub type ModelLoader =
    Arc<dyn Fn() -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync>;

enum Backend {
    Model(Arc<dyn Embedder>),
    Fallback { reason: String },
}

/// Text to fixed-length vector conversion with a deterministic fallback.
///
/// The model is loaded lazily on first use; concurrent callers wait on the
/// same load. When loading fails, or the model reports a width other than
/// `EMBEDDING_DIM`, every later call produces a fallback vector.
pub struct EmbeddingEngine {
    loader: ModelLoader,
    load_timeout: Option<Duration>,
    backend: OnceCell<Backend>,
    dimensions: usize,
}

impl EmbeddingEngine {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            load_timeout: None,
            backend: OnceCell::new(),
            dimensions: EMBEDDING_DIM,
        }
    }

    /// Gives up on the model, and falls back, when loading takes longer.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Engine backed by a fastembed model cached under `base_path/models`.
    pub fn fastembed(config: &SemanticSearchConfig, base_path: PathBuf) -> Self {
        let model_name = config.model.clone();

        Self::new(Arc::new(move || {
            let model = FastEmbedder::load(&model_name, &base_path)?;
            Ok(Arc::new(model) as Arc<dyn Embedder>)
        }))
        .with_load_timeout(Duration::from_secs(config.download_timeout_secs))
    }

    /// Engine that never loads a model.
    pub fn fallback_only() -> Self {
        Self::new(Arc::new(|| {
            Err(EmbeddingError::InitFailed(
                "semantic model disabled".to_string(),
            ))
        }))
    }

    /// Forces the model load. Returns the reason when the engine ended up on
    /// the fallback path.
    pub async fn preload(&self) -> Result<(), String> {
        match self.backend().await {
            Backend::Model(_) => Ok(()),
            Backend::Fallback { reason } => Err(reason.clone()),
        }
    }

    /// Embeds `text` into an L2-normalized vector of `dimensions()` length.
    /// Empty or whitespace-only text yields the zero vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }

        let model = match self.backend().await {
            Backend::Model(model) => model.clone(),
            Backend::Fallback { .. } => return Ok(fallback_embedding(text, self.dimensions)),
        };

        let input = text.to_string();
        let mut vector = tokio::task::spawn_blocking(move || model.embed(&input))
            .await
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("embedding task failed: {e}")))??;

        if vector.len() != self.dimensions {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                vector.len()
            )));
        }

        if !l2_normalize(&mut vector) {
            vector.fill(0.0);
        }
        Ok(vector)
    }

    async fn backend(&self) -> &Backend {
        self.backend
            .get_or_init(|| async {
                let loader = self.loader.clone();
                let load = tokio::task::spawn_blocking(move || loader());
                let joined = match self.load_timeout {
                    Some(limit) => tokio::time::timeout(limit, load).await.map_err(|_| {
                        EmbeddingError::InitFailed(format!("model load took longer than {limit:?}"))
                    }),
                    None => Ok(load.await),
                };
                let loaded = joined.and_then(|joined| {
                    joined
                        .map_err(|e| EmbeddingError::InitFailed(format!("loader panicked: {e}")))
                        .and_then(|result| result)
                });

                let backend = match loaded {
                    Ok(model) if model.dimensions() == self.dimensions => {
                        log::info!(
                            "embedding model '{}' ready ({} dimensions)",
                            model.name(),
                            model.dimensions()
                        );
                        return Backend::Model(model);
                    }
                    Ok(model) => Backend::Fallback {
                        reason: format!(
                            "model '{}' produces {} dimensions, expected {}",
                            model.name(),
                            model.dimensions(),
                            self.dimensions
                        ),
                    },
                    Err(e) => Backend::Fallback {
                        reason: e.to_string(),
                    },
                };

                if let Backend::Fallback { reason } = &backend {
                    log::warn!("embedding model unavailable, using fallback vectors: {reason}");
                }
                backend
            })
            .await
    }
}
