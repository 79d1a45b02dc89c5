//! Embedding Engine, run inside an isolated task.
//!
//! - `embeddings`: fastembed model wrapper
//! - `fallback`: deterministic vectors used when the model cannot load
//! - `engine`: lazy once-only model loading and the embed entry point
//! - `worker`: the sandbox task that owns an engine and talks only over channels

mod embeddings;
mod engine;
mod fallback;
mod worker;

pub use embeddings::EmbeddingError;
pub use engine::EmbeddingEngine;
pub use worker::{spawn, SandboxHandle};

/// Width of every embedding in the system
pub const EMBEDDING_DIM: usize = 384;
