use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::bridge::envelope::{Action, AnalysisComplete, Request, SandboxMessage, WorkHandle};
use crate::bridge::registry::PendingRegistry;
use crate::eid::Eid;
use crate::sandbox::{self, EmbeddingEngine, SandboxHandle};

/// Builds the engine for a fresh sandbox.
pub type EngineFactory = Arc<dyn Fn() -> EmbeddingEngine + Send + Sync>;

const COMPLETIONS_CAPACITY: usize = 256;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("sandbox is unavailable")]
    SandboxUnavailable,

    #[error("sandbox did not answer within {0:?}")]
    Timeout(Duration),

    #[error("request was cancelled")]
    Cancelled,

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("invalid sandbox response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct VectorReply {
    vector: Vec<f32>,
}

/// Owns the sandbox and correlates its replies with callers.
///
/// At most one sandbox exists at a time. It is created on first use under a
/// single async lock, and replaced when it is found dead.
pub struct WorkerBridge {
    engine_factory: EngineFactory,
    sandbox: Mutex<Option<SandboxHandle>>,
    registry: Arc<PendingRegistry>,
    generation: Arc<AtomicU64>,
    completions: broadcast::Sender<AnalysisComplete>,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
    dispatcher: JoinHandle<()>,
    timeout: Duration,
    created: AtomicUsize,
}

impl WorkerBridge {
    /// Must be called from within a tokio runtime.
    pub fn new(engine_factory: EngineFactory, timeout: Duration) -> Self {
        let registry = Arc::new(PendingRegistry::new());
        let generation = Arc::new(AtomicU64::new(0));
        let (completions, _) = broadcast::channel(COMPLETIONS_CAPACITY);
        let (outbound, inbound) = mpsc::unbounded_channel();

        let dispatcher = tokio::spawn(dispatch(
            inbound,
            registry.clone(),
            generation.clone(),
            completions.clone(),
        ));

        Self {
            engine_factory,
            sandbox: Mutex::new(None),
            registry,
            generation,
            completions,
            outbound,
            dispatcher,
            timeout,
            created: AtomicUsize::new(0),
        }
    }

    /// Awaited round trip through the sandbox, bounded by the bridge timeout.
    pub async fn relay(&self, action: Action) -> Result<Value, BridgeError> {
        let correlation_id = Eid::new();
        let generation = self.generation();
        let rx = self.registry.register(correlation_id.clone(), generation);

        let request = Request {
            action,
            correlation_id: correlation_id.clone(),
            generation,
        };
        if let Err(e) = self.post(request).await {
            self.registry.evict(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BridgeError::Cancelled),
            Err(_) => {
                self.registry.evict(&correlation_id);
                log::warn!("sandbox request {correlation_id} timed out after {:?}", self.timeout);
                Err(BridgeError::Timeout(self.timeout))
            }
        }
    }

    pub async fn ping(&self) -> Result<(), BridgeError> {
        self.relay(Action::Ping).await.map(|_| ())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
        let reply = self
            .relay(Action::EmbedQuery {
                text: text.to_string(),
            })
            .await?;
        let reply: VectorReply = serde_json::from_value(reply)?;
        Ok(reply.vector)
    }

    /// Fire-and-forget analysis. The result arrives on [`Self::completions`].
    pub async fn submit(&self, id: u64, text: String) -> Result<WorkHandle, BridgeError> {
        self.submit_in(id, text, self.generation()).await
    }

    /// Like [`Self::submit`], but tagged with a generation taken earlier.
    /// If the bridge was invalidated since, the completion is discarded.
    pub async fn submit_in(
        &self,
        id: u64,
        text: String,
        generation: u64,
    ) -> Result<WorkHandle, BridgeError> {
        let correlation_id = Eid::new();

        self.post(Request {
            action: Action::AnalyzeCapture { id, text },
            correlation_id: correlation_id.clone(),
            generation,
        })
        .await?;

        Ok(WorkHandle {
            status: "started".to_string(),
            id,
            correlation_id,
            generation,
        })
    }

    pub fn completions(&self) -> broadcast::Receiver<AnalysisComplete> {
        self.completions.subscribe()
    }

    /// Starts a new generation: waiting requests fail with `Cancelled` and
    /// anything still in flight is discarded when it comes back.
    pub fn invalidate(&self) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self.registry.fail_all();
        log::debug!("bridge generation {generation}, cancelled {failed} pending requests");
        failed
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of sandboxes created over the bridge's lifetime.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn is_alive(&self) -> bool {
        self.sandbox
            .lock()
            .await
            .as_ref()
            .is_some_and(|sandbox| sandbox.is_alive())
    }

    /// Stops the current sandbox. The next request creates a new one.
    pub async fn shutdown(&self) {
        if self.sandbox.lock().await.take().is_some() {
            self.invalidate();
            log::debug!("sandbox shut down");
        }
    }

    async fn post(&self, request: Request) -> Result<(), BridgeError> {
        let mut sandbox = self.sandbox.lock().await;

        let alive = sandbox.as_ref().is_some_and(|s| s.is_alive());
        if !alive {
            if sandbox.is_some() {
                log::warn!("sandbox died, starting a new one");
            }
            *sandbox = Some(sandbox::spawn(
                (self.engine_factory)(),
                self.outbound.clone(),
            ));
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        let Some(handle) = sandbox.as_ref() else {
            return Err(BridgeError::SandboxUnavailable);
        };
        handle
            .post(request)
            .map_err(|_| BridgeError::SandboxUnavailable)
    }
}

impl Drop for WorkerBridge {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(
    mut inbound: mpsc::UnboundedReceiver<SandboxMessage>,
    registry: Arc<PendingRegistry>,
    generation: Arc<AtomicU64>,
    completions: broadcast::Sender<AnalysisComplete>,
) {
    while let Some(message) = inbound.recv().await {
        let current = generation.load(Ordering::SeqCst);

        match message {
            SandboxMessage::Result {
                correlation_id,
                generation,
                result,
            } => {
                if generation != current || !registry.resolve(&correlation_id, generation, Ok(result)) {
                    log::debug!("dropping reply {correlation_id} (generation {generation})");
                }
            }
            SandboxMessage::Error {
                correlation_id,
                generation,
                error,
            } => {
                if generation != current
                    || !registry.resolve(&correlation_id, generation, Err(BridgeError::Sandbox(error)))
                {
                    log::debug!("dropping error reply {correlation_id} (generation {generation})");
                }
            }
            SandboxMessage::AnalysisComplete {
                correlation_id,
                generation,
                result,
            } => {
                if generation != current {
                    log::debug!(
                        "dropping stale analysis of capture {} ({correlation_id}, generation {generation})",
                        result.id
                    );
                    continue;
                }
                // no subscribers is fine, the capture is back-filled later
                let _ = completions.send(result);
            }
            SandboxMessage::LogError { error } => {
                log::error!("sandbox: {error}");
            }
        }
    }
}
