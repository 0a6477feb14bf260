//! Semantic retrieval over indexed messages.
//!
//! The retriever operates entirely through the [`EmbeddingProvider`] and
//! [`VectorStore`] traits.
//!
//! # Ranking Algorithm
//!
//! 1. Reject an empty query before any network call.
//! 2. Embed the query.
//! 3. Fetch `limit × 3` candidate chunks scoring at least `0.1`.
//! 4. Drop hits without `email_id`, `subject` or `from`, and hits whose
//!    `email_id` or `subject` is a nil sentinel.
//! 5. Group by message, keeping the best-scoring hit (MAX aggregation).
//! 6. Apply the caller's minimum score.
//! 7. Sort by score (desc) and truncate to `limit`.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::models::{RankedResult, SearchHit};
use crate::store::VectorStore;
use crate::BoxError;

/// Candidate pool size as a multiple of the requested limit.
pub const CANDIDATE_MULTIPLIER: usize = 3;

/// Score below which the store does not return candidates.
pub const CANDIDATE_SCORE_FLOOR: f32 = 0.1;

/// Payload values written by tools that stringified a missing field.
const NIL_SENTINELS: &[&str] = &["<nil>", "nil"];

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty query")]
    EmptyQuery,
    #[error("failed to embed query")]
    Embedding(#[source] BoxError),
    #[error("vector search failed")]
    Store(#[source] BoxError),
}

/// Per-call search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of messages to return.
    pub limit: usize,
    /// Drop messages whose best score is below this.
    pub min_score: Option<f32>,
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            min_score: None,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    candidate_multiplier: usize,
    score_floor: f32,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            candidate_multiplier: CANDIDATE_MULTIPLIER,
            score_floor: CANDIDATE_SCORE_FLOOR,
        }
    }

    /// Override the candidate pool size and store-side score floor.
    pub fn with_candidate_pool(mut self, multiplier: usize, score_floor: f32) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self.score_floor = score_floor;
        self
    }

    /// Rank messages by semantic similarity to `query`.
    ///
    /// An empty result is not an error.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<RankedResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| SearchError::Embedding(e.into()))?;

        let candidates = options.limit.saturating_mul(self.candidate_multiplier);
        let hits = self
            .store
            .query(&vector, candidates, self.score_floor)
            .await
            .map_err(|e| SearchError::Store(e.into()))?;
        debug!(raw_results = hits.len(), candidates, "Vector search completed");

        Ok(rank_hits(hits, options))
    }
}

/// Collapse raw hits into at most `options.limit` results, one per message.
pub fn rank_hits(hits: Vec<SearchHit>, options: &SearchOptions) -> Vec<RankedResult> {
    let mut best: HashMap<String, RankedResult> = HashMap::new();

    for hit in hits {
        let payload = hit.payload;
        let (Some(email_id), Some(subject), Some(from)) =
            (payload.email_id, payload.subject, payload.from)
        else {
            warn!(point_id = %hit.id, "Skipping result with missing fields");
            continue;
        };
        if is_nil(&email_id) || is_nil(&subject) {
            warn!(point_id = %hit.id, "Skipping result: field is nil");
            continue;
        }

        let replace = best
            .get(&email_id)
            .map(|existing| hit.score > existing.score)
            .unwrap_or(true);
        if replace {
            best.insert(
                email_id.clone(),
                RankedResult {
                    email_id,
                    score: hit.score,
                    subject,
                    from,
                    snippet: payload.content.unwrap_or_default(),
                },
            );
        }
    }

    let mut results: Vec<RankedResult> = best.into_values().collect();
    if let Some(min_score) = options.min_score {
        results.retain(|r| r.score >= min_score);
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(options.limit);
    results
}

fn is_nil(value: &str) -> bool {
    NIL_SENTINELS.contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionStats, HitPayload, IndexPoint, PointPayload};
    use crate::store::memory::InMemoryVectorStore;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn hit(email_id: &str, score: f32) -> SearchHit {
        SearchHit {
            id: format!("{}-{}", email_id, score),
            score,
            payload: HitPayload {
                email_id: Some(email_id.to_string()),
                subject: Some(format!("subject {}", email_id)),
                from: Some("a@example.com".to_string()),
                content: Some(format!("content {}", score)),
                chunk_position: Some(0),
            },
        }
    }

    /// Always returns the same unit vector; counts calls.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("connection refused")
        }
    }

    /// Store whose queries always fail.
    struct UnreachableStore;

    #[async_trait]
    impl VectorStore for UnreachableStore {
        async fn upsert(&self, _points: &[IndexPoint]) -> Result<()> {
            bail!("qdrant unavailable")
        }

        async fn query(
            &self,
            _vector: &[f32],
            _limit: usize,
            _score_threshold: f32,
        ) -> Result<Vec<SearchHit>> {
            bail!("qdrant unavailable")
        }

        async fn delete_by_parent_id(&self, _email_id: &str) -> Result<()> {
            bail!("qdrant unavailable")
        }

        async fn collection_stats(&self) -> Result<CollectionStats> {
            bail!("qdrant unavailable")
        }
    }

    fn stored_point(email_id: &str, position: usize, vector: Vec<f32>) -> IndexPoint {
        IndexPoint {
            id: Uuid::new_v3(&Uuid::nil(), format!("{}_{}", email_id, position).as_bytes()),
            vector,
            payload: PointPayload {
                email_id: email_id.to_string(),
                subject: format!("subject {}", email_id),
                from: "a@example.com".to_string(),
                date: None,
                chunk_position: position,
                content: format!("{} chunk {}", email_id, position),
            },
        }
    }

    #[test]
    fn test_dedup_keeps_best_score() {
        let results = rank_hits(vec![hit("m1", 0.6), hit("m1", 0.8)], &SearchOptions::new(10));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].email_id, "m1");
        assert!((results[0].score - 0.8).abs() < 1e-6);
        assert_eq!(results[0].snippet, "content 0.8");
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let hits = vec![hit("a", 0.3), hit("b", 0.9), hit("c", 0.5), hit("d", 0.7)];
        let results = rank_hits(hits, &SearchOptions::new(3));
        let ids: Vec<&str> = results.iter().map(|r| r.email_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "c"]);
    }

    #[test]
    fn test_min_score_filters_before_truncation() {
        let hits = (0..20)
            .map(|i| hit(&format!("m{}", i), i as f32 / 20.0))
            .collect();
        let results = rank_hits(hits, &SearchOptions::new(5).with_min_score(0.5));
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.score >= 0.5));

        let hits = vec![hit("a", 0.9), hit("b", 0.4), hit("c", 0.55)];
        let results = rank_hits(hits, &SearchOptions::new(5).with_min_score(0.5));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_invalid_hits_dropped() {
        let mut missing_from = hit("a", 0.9);
        missing_from.payload.from = None;
        let mut nil_id = hit("<nil>", 0.8);
        nil_id.payload.email_id = Some("<nil>".to_string());
        let mut nil_subject = hit("c", 0.7);
        nil_subject.payload.subject = Some("nil".to_string());

        let results = rank_hits(
            vec![missing_from, nil_id, nil_subject, hit("ok", 0.2)],
            &SearchOptions::new(10),
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].email_id, "ok");
    }

    #[tokio::test]
    async fn test_whitespace_query_rejected_without_embedding() {
        let embedder = Arc::new(CountingEmbedder::default());
        let retriever = Retriever::new(embedder.clone(), Arc::new(InMemoryVectorStore::new()));

        let err = retriever
            .search("   ", &SearchOptions::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_makes_no_calls() {
        let embedder = Arc::new(CountingEmbedder::default());
        let retriever = Retriever::new(embedder.clone(), Arc::new(InMemoryVectorStore::new()));

        let results = retriever.search("hello", &SearchOptions::new(0)).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_end_to_end() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .upsert(&[
                stored_point("m1", 0, vec![1.0, 0.0]),
                stored_point("m1", 1, vec![0.9, 0.1]),
                stored_point("m2", 0, vec![0.6, 0.8]),
                stored_point("m3", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(CountingEmbedder::default()), store);

        let results = retriever
            .search("  anything  ", &SearchOptions::new(5))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.email_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(results[0].snippet, "m1 chunk 0");
    }

    #[tokio::test]
    async fn test_candidate_pool_limits_raw_hits() {
        let store = Arc::new(InMemoryVectorStore::new());
        store
            .upsert(&[
                stored_point("m1", 0, vec![1.0, 0.0]),
                stored_point("m1", 1, vec![0.99, 0.01]),
                stored_point("m2", 0, vec![0.9, 0.1]),
            ])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(CountingEmbedder::default()), store)
            .with_candidate_pool(1, 0.1);

        // Only the two m1 chunks fit in a pool of 2, so m2 is never seen.
        let results = retriever.search("q", &SearchOptions::new(2)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].email_id, "m1");
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let retriever = Retriever::new(
            Arc::new(BrokenEmbedder),
            Arc::new(InMemoryVectorStore::new()),
        );
        let err = retriever
            .search("hello", &SearchOptions::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Embedding(_)));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let embedder = Arc::new(CountingEmbedder::default());
        let retriever = Retriever::new(embedder.clone(), Arc::new(UnreachableStore));

        let err = retriever
            .search("hello", &SearchOptions::new(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Store(_)));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("qdrant unavailable"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
