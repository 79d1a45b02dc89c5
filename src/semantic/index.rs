//! Capture embeddings held in memory, keyed by capture id.
//!
//! Nothing here is persisted: the store keeps the embeddings and the index
//! is rebuilt from it on start.

use std::collections::BTreeMap;

use crate::semantic::similarity::l2_norm;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    /// Fingerprint of the title, URL and text the vector was computed from
    pub content_hash: u64,
    pub vector: Vec<f32>,
}

/// Vectors of a single width. One entry per capture; writing an id again
/// replaces its entry.
pub struct VectorIndex {
    width: usize,
    vectors: BTreeMap<u64, IndexedVector>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector has {got} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("zero vector cannot be indexed")]
    ZeroNormVector,
}

impl VectorIndex {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            vectors: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Stores `vector` for `id`, returning the entry it replaced.
    pub fn upsert(
        &mut self,
        id: u64,
        content_hash: u64,
        vector: Vec<f32>,
    ) -> Result<Option<IndexedVector>, IndexError> {
        if vector.len() != self.width {
            return Err(IndexError::DimensionMismatch {
                expected: self.width,
                got: vector.len(),
            });
        }
        if l2_norm(&vector) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(self.vectors.insert(
            id,
            IndexedVector {
                content_hash,
                vector,
            },
        ))
    }

    pub fn get(&self, id: u64) -> Option<&IndexedVector> {
        self.vectors.get(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<IndexedVector> {
        self.vectors.remove(&id)
    }

    /// Drops every entry whose id fails `keep`. Returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(u64) -> bool) -> usize {
        let before = self.vectors.len();
        self.vectors.retain(|id, _| keep(*id));
        before - self.vectors.len()
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }
}
