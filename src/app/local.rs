use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::{
    bridge::{EngineFactory, WorkerBridge},
    capture::{
        run_scheduler, CaptureEvent, CaptureOrchestrator, CaptureOutcome, CapturePolicy,
        PushedSurface, ScheduleOptions, Trigger,
    },
    captures::{with_store, BackendJson, Capture, CaptureManager},
    config::Config,
    retention,
    sandbox::EmbeddingEngine,
    semantic::{
        BackfillOptions, BuildResult, LlmExpander, QueryExpander, ScoredCapture, SemanticSearch,
    },
    storage::{self, StorageManager},
};

use super::{
    backend::{AppBackend, AppFuture},
    errors::AppError,
    factory::AppPaths,
    messages::{Message, Reply, SearchReply, Stats},
};

/// The whole pipeline in one process: store, bridge, index, orchestrator.
pub struct AppLocal {
    config: Config,
    store: Arc<dyn CaptureManager>,
    bridge: Arc<WorkerBridge>,
    search: Arc<SemanticSearch>,
    surface: Arc<PushedSurface>,
    orchestrator: Arc<CaptureOrchestrator>,
    expander: Option<Arc<dyn QueryExpander>>,

    triggers: Mutex<Option<mpsc::UnboundedReceiver<Trigger>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppLocal {
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, paths: &AppPaths) -> anyhow::Result<Self> {
        let storage_mgr: Arc<dyn StorageManager> =
            Arc::new(storage::BackendLocal::new(&paths.base_path)?);
        let store: Arc<dyn CaptureManager> =
            Arc::new(BackendJson::load(storage_mgr, &paths.captures_file)?);

        let engine_factory: EngineFactory = if config.semantic_search.enabled {
            let semantic = config.semantic_search.clone();
            let base_path = paths.base_path.clone();
            Arc::new(move || EmbeddingEngine::fastembed(&semantic, base_path.clone()))
        } else {
            Arc::new(EmbeddingEngine::fallback_only)
        };

        let expander: Option<Arc<dyn QueryExpander>> = if config.query_expansion.enabled {
            Some(Arc::new(
                LlmExpander::new(&config.query_expansion)
                    .context("failed to create query expansion client")?,
            ))
        } else {
            None
        };

        Self::new_with(config, store, engine_factory, expander)
    }

    /// Must be called from within a tokio runtime.
    pub fn new_with(
        config: Config,
        store: Arc<dyn CaptureManager>,
        engine_factory: EngineFactory,
        expander: Option<Arc<dyn QueryExpander>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let bridge = Arc::new(WorkerBridge::new(engine_factory, config.relay_timeout()));
        let search = Arc::new(SemanticSearch::new());

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let surface = Arc::new(PushedSurface::new(trigger_tx));

        let policy = CapturePolicy::new(&config.excluded_url_patterns)?;
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            store.clone(),
            surface.clone(),
            bridge.clone(),
            search.clone(),
            policy,
            config.embed_text_limit,
        ));

        Ok(Self {
            config,
            store,
            bridge,
            search,
            surface,
            orchestrator,
            expander,
            triggers: Mutex::new(Some(trigger_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn surface(&self) -> &PushedSurface {
        &self.surface
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.orchestrator.subscribe()
    }

    pub fn bridge(&self) -> &Arc<WorkerBridge> {
        &self.bridge
    }

    /// Starts the daemon's background work: the completion listener, the
    /// index build with back-fill, the capture scheduler and the retention
    /// job. Calling it twice does not start the scheduler twice.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        tasks.push(self.orchestrator.spawn_completion_listener());

        tasks.push(tokio::spawn({
            let app = self.clone();
            async move {
                if let Err(e) = app.bridge.ping().await {
                    log::warn!("embedding sandbox did not answer: {e}");
                }
                if let Err(e) = app.rebuild_index(true).await {
                    log::error!("failed to build semantic index: {e}");
                }
            }
        }));

        let triggers = self.triggers.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(triggers) = triggers {
            tasks.push(tokio::spawn(run_scheduler(
                self.orchestrator.clone(),
                triggers,
                ScheduleOptions::from_config(&self.config),
            )));
        }

        tasks.push(retention::spawn_retention(
            self.store.clone(),
            self.search.clone(),
            self.config.retention_days,
            self.config.cleanup_hour,
        ));
    }

    /// Indexes the stored embeddings. With `backfill`, unprocessed captures
    /// are also submitted for analysis.
    pub async fn rebuild_index(&self, backfill: bool) -> Result<BuildResult, AppError> {
        let mut captures = with_store(&self.store, |s| s.all()).await?;
        if !backfill {
            captures.retain(|c| c.embedding.is_some());
        }

        let options = BackfillOptions {
            delay: self.config.backfill_delay(),
            text_limit: self.config.embed_text_limit,
        };
        Ok(self
            .search
            .build_index(&captures, &self.bridge, options)
            .await?)
    }

    pub async fn capture_now(&self, force: bool) -> Result<CaptureOutcome, AppError> {
        Ok(self.orchestrator.capture_active_surface(force).await?)
    }

    pub async fn get_capture(&self, id: u64) -> Result<Option<Capture>, AppError> {
        Ok(with_store(&self.store, move |s| s.get(id)).await?)
    }

    /// Query flow: expand the query, embed query and expansions through the
    /// bridge and rank by similarity. Without a usable vector, fall back to
    /// keyword scoring over the expansions, or to the store's plain keyword
    /// search when there are none.
    pub async fn search(&self, query: &str, semantic: bool) -> Result<SearchReply, AppError> {
        let expansions = self.expand(query).await;
        let captures = with_store(&self.store, |s| s.all()).await?;

        let semantic = semantic && self.config.semantic_search.enabled;
        if semantic && !self.search.is_built() {
            self.rebuild_index(false).await?;
        }
        if semantic {
            match self.embed_query(query, &expansions).await {
                Ok(Some(vector)) => {
                    let results = self
                        .search
                        .search(query, &captures, Some(&vector), &expansions)?;
                    return Ok(SearchReply {
                        results,
                        semantic: true,
                    });
                }
                Ok(None) => log::debug!("query has no usable vector, using keyword search"),
                Err(e) => log::warn!("semantic search failed, falling back to keyword: {e}"),
            }
        }

        let results = if expansions.is_empty() {
            let query = query.to_string();
            with_store(&self.store, move |s| s.search(&query))
                .await?
                .into_iter()
                .map(|capture| ScoredCapture {
                    capture,
                    search_score: None,
                })
                .collect()
        } else {
            self.search.search(query, &captures, None, &expansions)?
        };

        Ok(SearchReply {
            results,
            semantic: false,
        })
    }

    async fn expand(&self, query: &str) -> Vec<String> {
        let Some(expander) = &self.expander else {
            return vec![];
        };
        if query.trim().is_empty() {
            return vec![];
        }

        match expander.expand(query).await {
            Ok(terms) => {
                log::debug!("expanded {query:?} to {terms:?}");
                terms
            }
            Err(e) => {
                log::warn!("query expansion failed: {e}");
                vec![]
            }
        }
    }

    async fn embed_query(
        &self,
        query: &str,
        expansions: &[String],
    ) -> Result<Option<Vec<f32>>, AppError> {
        let text = if expansions.is_empty() {
            query.to_string()
        } else {
            format!("{query}, {}", expansions.join(", "))
        };

        let vector = self.bridge.embed_query(&text).await?;
        Ok(vector.iter().any(|x| *x != 0.0).then_some(vector))
    }

    pub async fn stats(&self) -> Result<Stats, AppError> {
        let store = with_store(&self.store, |s| s.stats()).await?;
        Ok(Stats {
            store,
            indexed: self.search.indexed_count(),
            index_built: self.search.is_built(),
            pending_requests: self.bridge.pending_count(),
            sandbox_alive: self.bridge.is_alive().await,
            sandboxes_started: self.bridge.created_count(),
        })
    }

    /// Runs the retention purge now.
    pub async fn purge(&self, days: Option<u32>) -> Result<usize, AppError> {
        let days = days.unwrap_or(self.config.retention_days);
        Ok(retention::purge_and_prune(&self.store, &self.search, days).await?)
    }

    /// Deletes every capture. Work still in flight for the deleted captures
    /// is discarded.
    pub async fn delete_all(&self) -> Result<usize, AppError> {
        self.bridge.invalidate();
        let deleted = with_store(&self.store, |s| s.delete_all()).await?;
        self.search.clear()?;
        log::info!("deleted all {deleted} captures");
        Ok(deleted)
    }

    pub async fn handle_message(&self, message: Message) -> Result<Reply, AppError> {
        log::debug!("message: {message:?}");

        let reply = match message {
            Message::CaptureNow { force } => Reply::Captured {
                success: true,
                outcome: self.capture_now(force).await?,
            },
            Message::GetCapture { id } => Reply::Capture {
                capture: self.get_capture(id).await?,
            },
            Message::Search { query, semantic } => {
                Reply::Search(self.search(&query, semantic).await?)
            }
            Message::GetStats => Reply::Stats {
                stats: self.stats().await?,
            },
            Message::DeleteAll => Reply::Deleted {
                success: true,
                deleted: self.delete_all().await?,
            },
            Message::Purge { days } => Reply::Deleted {
                success: true,
                deleted: self.purge(days).await?,
            },
        };

        Ok(reply)
    }

    /// Stops background work and the sandbox.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.bridge.shutdown().await;
        log::info!("traceback stopped");
    }
}

impl AppBackend for AppLocal {
    fn handle(&self, message: Message) -> AppFuture<'_, Reply> {
        Box::pin(self.handle_message(message))
    }
}
