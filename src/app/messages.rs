use serde::{Deserialize, Serialize};

use crate::{
    capture::CaptureOutcome,
    captures::{Capture, CaptureStats},
    semantic::ScoredCapture,
};

/// Actions accepted on the message endpoint, as `{"action": ..., ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Message {
    CaptureNow {
        #[serde(default)]
        force: bool,
    },
    GetCapture {
        id: u64,
    },
    Search {
        #[serde(default)]
        query: String,
        #[serde(default)]
        semantic: bool,
    },
    GetStats,
    DeleteAll,
    /// Runs the retention purge now; `days` defaults to the configured horizon
    Purge {
        #[serde(default)]
        days: Option<u32>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReply {
    pub results: Vec<ScoredCapture>,
    /// Whether the results were ranked by vector similarity
    pub semantic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(flatten)]
    pub store: CaptureStats,
    pub indexed: usize,
    pub index_built: bool,
    pub pending_requests: usize,
    pub sandbox_alive: bool,
    /// Sandboxes created since start, including restarts after a crash
    pub sandboxes_started: usize,
}

/// Reply to a [`Message`].
///
/// Untagged: every variant has a required field the others lack, except
/// `Capture`, which must stay last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Captured {
        success: bool,
        outcome: CaptureOutcome,
    },
    Search(SearchReply),
    Stats {
        stats: Stats,
    },
    Deleted {
        success: bool,
        deleted: usize,
    },
    Capture {
        capture: Option<Capture>,
    },
}
