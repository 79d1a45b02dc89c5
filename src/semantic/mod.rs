//! Semantic Search Engine over capture embeddings.
//!
//! # Architecture
//!
//! - `index`: In-memory vector index keyed by capture id
//! - `similarity`: Cosine similarity
//! - `lexical`: Keyword scoring used when no query vector is available
//! - `expansion`: AI query expansion through an OpenAI-compatible endpoint
//! - `preprocess`: Text preparation for embedding input
//! - `service`: Index maintenance, back-fill and ranking

pub mod expansion;
mod index;
pub mod lexical;
mod preprocess;
mod service;
mod similarity;

pub use expansion::{ExpansionError, ExpansionFuture, LlmExpander, QueryExpander};
pub use preprocess::embedding_input;
pub use service::{
    BackfillOptions, BuildResult, ScoredCapture, SemanticSearch, SemanticSearchError,
    SIMILARITY_SCALE,
};
