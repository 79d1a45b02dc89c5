//! Semantic search service for captures.
//!
//! - Keeps the in-memory vector index in sync with the capture store
//! - Back-fills captures that never got an embedding
//! - Scores captures against a query vector, or by keywords when there is none

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeError, WorkerBridge};
use crate::captures::Capture;
use crate::sandbox::EMBEDDING_DIM;
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::lexical;
use crate::semantic::preprocess::{content_hash, embedding_input};
use crate::semantic::similarity::cosine_similarity;

/// Similarities at or below this never contribute to a score.
pub const SIMILARITY_GATE: f32 = 0.2;
/// Multiplier turning a similarity into a score contribution.
pub const SIMILARITY_SCALE: f32 = 200.0;
/// Vector results must score strictly above this to be returned.
pub const RESULT_THRESHOLD: f32 = 15.0;

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A capture with the score it was ranked by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCapture {
    #[serde(flatten)]
    pub capture: Capture,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_score: Option<f32>,
}

/// Outcome of an index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildResult {
    /// Captures that already had an embedding and were indexed
    pub indexed: usize,
    /// Unprocessed captures submitted for analysis
    pub backfilled: usize,
}

/// How the back-fill pass submits work.
#[derive(Debug, Clone, Copy)]
pub struct BackfillOptions {
    /// Pause between two submissions
    pub delay: Duration,
    /// Maximum characters of text per capture
    pub text_limit: usize,
}

pub struct SemanticSearch {
    index: RwLock<VectorIndex>,
    built: AtomicBool,
}

impl Default for SemanticSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticSearch {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(VectorIndex::new(EMBEDDING_DIM)),
            built: AtomicBool::new(false),
        }
    }

    /// True once `build_index` indexed the stored embeddings.
    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::SeqCst)
    }

    /// Get the number of indexed captures.
    pub fn indexed_count(&self) -> usize {
        self.read_index().map(|index| index.len()).unwrap_or(0)
    }

    /// Indexes every capture that has an embedding, then sequentially
    /// submits the unprocessed ones without an embedding to the bridge.
    ///
    /// Back-filled captures reach the index through [`Self::add_to_index`]
    /// when their analysis completes. A submission failure stops the pass;
    /// the remaining captures are picked up by the next build. So does a
    /// bridge invalidation, since the snapshot in `captures` is stale then.
    pub async fn build_index(
        &self,
        captures: &[Capture],
        bridge: &WorkerBridge,
        options: BackfillOptions,
    ) -> Result<BuildResult, SemanticSearchError> {
        let generation = bridge.generation();
        let mut result = BuildResult::default();
        let mut pending = Vec::new();

        for capture in captures {
            if capture.embedding.is_some() {
                if self.add_to_index(capture)? {
                    result.indexed += 1;
                }
            } else if !capture.processed {
                pending.push(capture);
            }
        }

        self.built.store(true, Ordering::SeqCst);
        log::info!(
            "semantic index built: {} indexed, {} to back-fill",
            result.indexed,
            pending.len()
        );

        for (i, capture) in pending.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(options.delay).await;
            }
            if bridge.generation() != generation {
                log::info!(
                    "back-fill cancelled after {} of {} captures",
                    result.backfilled,
                    pending.len()
                );
                break;
            }

            let text = embedding_input(
                &capture.title,
                &capture.url,
                &capture.dom_text,
                options.text_limit,
            );
            if let Err(e) = bridge.submit_in(capture.id, text, generation).await {
                log::warn!(
                    "back-fill stopped after {} of {} captures: {e}",
                    result.backfilled,
                    pending.len()
                );
                return Err(e.into());
            }
            result.backfilled += 1;
        }

        Ok(result)
    }

    /// Idempotent insert or update by capture id. Returns false when the
    /// capture has no usable embedding.
    pub fn add_to_index(&self, capture: &Capture) -> Result<bool, SemanticSearchError> {
        let Some(embedding) = &capture.embedding else {
            return Ok(false);
        };

        let hash = content_hash(&capture.title, &capture.url, &capture.dom_text);
        let mut index = self.write_index()?;

        if index
            .get(capture.id)
            .is_some_and(|entry| entry.content_hash == hash && &entry.vector == embedding)
        {
            return Ok(true);
        }

        match index.upsert(capture.id, hash, embedding.clone()) {
            Ok(_) => Ok(true),
            Err(IndexError::ZeroNormVector) => {
                index.remove(capture.id);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops index entries whose capture is not in `live_ids`.
    pub fn prune(&self, live_ids: &[u64]) -> Result<usize, SemanticSearchError> {
        let mut index = self.write_index()?;
        Ok(index.retain(|id| live_ids.contains(&id)))
    }

    pub fn clear(&self) -> Result<(), SemanticSearchError> {
        self.write_index()?.clear();
        Ok(())
    }

    /// Ranks `captures` for a query, highest score first.
    ///
    /// With a query vector the score is `similarity * SIMILARITY_SCALE` for
    /// similarities above `SIMILARITY_GATE`, and only scores above
    /// `RESULT_THRESHOLD` are returned. Keyword overlap does not contribute.
    ///
    /// Without a query vector the score is the keyword score of the query
    /// terms plus the expansion terms; every capture matching at least one
    /// term is returned.
    pub fn search(
        &self,
        query: &str,
        captures: &[Capture],
        query_vector: Option<&[f32]>,
        expansions: &[String],
    ) -> Result<Vec<ScoredCapture>, SemanticSearchError> {
        let mut results = match query_vector {
            Some(vector) => self.vector_scores(captures, vector)?,
            None => keyword_scores(query, captures, expansions),
        };

        results.sort_by(|a, b| {
            b.search_score
                .partial_cmp(&a.search_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(results)
    }

    fn vector_scores(
        &self,
        captures: &[Capture],
        query_vector: &[f32],
    ) -> Result<Vec<ScoredCapture>, SemanticSearchError> {
        let index = self.read_index()?;

        let results = captures
            .iter()
            .filter_map(|capture| {
                let embedding = index
                    .get(capture.id)
                    .map(|entry| entry.vector.as_slice())
                    .or(capture.embedding.as_deref())?;

                let similarity = cosine_similarity(query_vector, embedding);
                if similarity <= SIMILARITY_GATE {
                    return None;
                }

                let score = similarity * SIMILARITY_SCALE;
                (score > RESULT_THRESHOLD).then(|| ScoredCapture {
                    capture: capture.clone(),
                    search_score: Some(score),
                })
            })
            .collect();

        Ok(results)
    }

    fn read_index(&self) -> Result<std::sync::RwLockReadGuard<'_, VectorIndex>, SemanticSearchError> {
        self.index
            .read()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write_index(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, VectorIndex>, SemanticSearchError> {
        self.index
            .write()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))
    }
}

fn keyword_scores(query: &str, captures: &[Capture], expansions: &[String]) -> Vec<ScoredCapture> {
    let terms = lexical::search_terms(query, expansions);
    if terms.is_empty() {
        return vec![];
    }

    captures
        .iter()
        .filter_map(|capture| {
            let score =
                lexical::score_fields(&terms, &capture.title, &capture.url, &capture.dom_text);
            (score.matched_terms > 0).then(|| ScoredCapture {
                capture: capture.clone(),
                search_score: Some(score.score),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    fn capture(id: u64, title: &str, embedding: Option<Vec<f32>>) -> Capture {
        Capture {
            id,
            timestamp: id as i64,
            url: format!("https://example.com/{id}"),
            title: title.to_string(),
            processed: embedding.is_some(),
            embedding,
            ..Default::default()
        }
    }

    /// Unit vector with cosine `sim` to `axis(0)`.
    fn with_similarity(sim: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[0] = sim;
        v[1] = (1.0 - sim * sim).sqrt();
        v
    }

    #[test]
    fn test_add_to_index_is_idempotent() {
        let search = SemanticSearch::new();
        let c = capture(1, "a", Some(axis(0)));

        assert!(search.add_to_index(&c).unwrap());
        assert!(search.add_to_index(&c).unwrap());
        assert_eq!(search.indexed_count(), 1);
    }

    #[test]
    fn test_add_without_embedding_is_noop() {
        let search = SemanticSearch::new();
        assert!(!search.add_to_index(&capture(1, "a", None)).unwrap());
        assert!(!search.add_to_index(&capture(2, "b", Some(vec![0.0; EMBEDDING_DIM]))).unwrap());
        assert_eq!(search.indexed_count(), 0);
    }

    #[test]
    fn test_wrong_width_is_rejected() {
        let search = SemanticSearch::new();
        let result = search.add_to_index(&capture(1, "a", Some(vec![1.0; 3])));
        assert!(matches!(result, Err(SemanticSearchError::Index(_))));
    }

    #[test]
    fn test_closer_vector_ranks_first() {
        let search = SemanticSearch::new();
        let captures = vec![
            capture(1, "far", Some(with_similarity(0.5))),
            capture(2, "near", Some(with_similarity(0.9))),
        ];
        for c in &captures {
            search.add_to_index(c).unwrap();
        }

        let results = search.search("q", &captures, Some(&axis(0)), &[]).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.capture.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!((results[0].search_score.unwrap() - 180.0).abs() < 1e-2);
    }

    #[test]
    fn test_similarity_gate_excludes_keyword_overlap() {
        let search = SemanticSearch::new();
        // title matches the query exactly but the vector is just under the gate
        let captures = vec![capture(1, "lions", Some(with_similarity(0.19)))];
        search.add_to_index(&captures[0]).unwrap();

        let results = search
            .search("lions", &captures, Some(&axis(0)), &["lions".to_string()])
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_results_are_not_capped() {
        let search = SemanticSearch::new();
        let captures: Vec<Capture> = (1..=50)
            .map(|id| capture(id, "x", Some(with_similarity(0.8))))
            .collect();

        let results = search.search("q", &captures, Some(&axis(0)), &[]).unwrap();
        assert_eq!(results.len(), 50);
    }

    #[test]
    fn test_keyword_scoring_uses_expansions() {
        let search = SemanticSearch::new();
        let captures = vec![
            capture(1, "BMW M3 review", None),
            capture(2, "Pasta recipes", None),
        ];

        let without = search.search("car", &captures, None, &[]).unwrap();
        assert!(without.is_empty());

        let expansions = vec!["bmw".to_string(), "vehicle".to_string()];
        let with = search.search("car", &captures, None, &expansions).unwrap();
        assert_eq!(with.len(), 1);
        assert_eq!(with[0].capture.id, 1);
    }

    #[test]
    fn test_prune_and_clear() {
        let search = SemanticSearch::new();
        for id in 1..=3 {
            search.add_to_index(&capture(id, "x", Some(axis(id as usize)))).unwrap();
        }

        assert_eq!(search.prune(&[2, 3]).unwrap(), 1);
        assert_eq!(search.indexed_count(), 2);

        search.clear().unwrap();
        assert_eq!(search.indexed_count(), 0);
    }

    #[test]
    fn test_scored_capture_flattens() {
        let scored = ScoredCapture {
            capture: capture(3, "t", None),
            search_score: Some(42.0),
        };
        let value = serde_json::to_value(&scored).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["search_score"], 42.0);
    }
}
