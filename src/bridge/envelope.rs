use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::eid::Eid;

/// Work the sandbox knows how to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Action {
    Ping,
    EmbedQuery { text: String },
    AnalyzeCapture { id: u64, text: String },
}

/// Envelope posted into the sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    #[serde(flatten)]
    pub action: Action,
    pub correlation_id: Eid,
    pub generation: u64,
}

/// Everything the sandbox can send back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxMessage {
    Result {
        correlation_id: Eid,
        generation: u64,
        result: Value,
    },
    Error {
        correlation_id: Eid,
        generation: u64,
        error: String,
    },
    AnalysisComplete {
        correlation_id: Eid,
        generation: u64,
        result: AnalysisComplete,
    },
    LogError {
        error: String,
    },
}

/// Result of a fire-and-forget capture analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisComplete {
    pub id: u64,
    /// `None` when the text produced no usable vector
    pub embedding: Option<Vec<f32>>,
}

/// Immediate acknowledgement of submitted work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkHandle {
    pub status: String,
    pub id: u64,
    pub correlation_id: Eid,
    pub generation: u64,
}
