use crate::{bridge::BridgeError, capture::CaptureError, semantic::SemanticSearchError};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("capture not found")]
    NotFound,

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("embedding bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("semantic search error: {0}")]
    Semantic(#[from] SemanticSearchError),

    #[error("reqwest error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Base64: {0:?}")]
    Base64(#[from] base64::DecodeError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
