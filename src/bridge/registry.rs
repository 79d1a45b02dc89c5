use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::bridge::BridgeError;
use crate::eid::Eid;

type Reply = Result<Value, BridgeError>;

struct Pending {
    generation: u64,
    tx: oneshot::Sender<Reply>,
}

/// Awaited requests by correlation id.
///
/// Every entry is removed exactly once: by its response, by eviction on
/// timeout, or by `fail_all` on invalidation.
#[derive(Default)]
pub struct PendingRegistry {
    pending: Mutex<HashMap<Eid, Pending>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Eid, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, correlation_id: Eid, generation: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(correlation_id, Pending { generation, tx });
        rx
    }

    /// Delivers a reply. Returns false when nobody waits for it anymore or the
    /// reply belongs to another generation than the request.
    pub fn resolve(&self, correlation_id: &Eid, generation: u64, reply: Reply) -> bool {
        let Some(pending) = self.lock().remove(correlation_id) else {
            return false;
        };

        if pending.generation != generation {
            let _ = pending.tx.send(Err(BridgeError::Cancelled));
            return false;
        }

        pending.tx.send(reply).is_ok()
    }

    pub fn evict(&self, correlation_id: &Eid) -> bool {
        self.lock().remove(correlation_id).is_some()
    }

    /// Fails every waiting request with `Cancelled`, returning how many there were.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<Pending> = self.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(BridgeError::Cancelled));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
