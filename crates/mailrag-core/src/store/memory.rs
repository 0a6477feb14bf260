//! In-memory [`VectorStore`] implementation for tests and local runs.
//!
//! Points live in a `HashMap` behind `std::sync::RwLock`, keyed by point
//! id, so upserts replace rather than accumulate. Queries are brute-force
//! cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{CollectionStats, HitPayload, IndexPoint, SearchHit};

use super::VectorStore;

/// In-memory vector store.
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<Uuid, IndexPoint>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every stored point, sorted.
    pub fn point_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .points
            .read()
            .map(|p| p.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()> {
        let mut stored = self.points.write().map_err(poisoned)?;
        for point in points {
            stored.insert(point.id, point.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.points.read().map_err(poisoned)?;
        let mut hits: Vec<SearchHit> = stored
            .values()
            .filter_map(|point| {
                let score = cosine_similarity(vector, &point.vector);
                (score >= score_threshold).then(|| SearchHit {
                    id: point.id.to_string(),
                    score,
                    payload: HitPayload::from(&point.payload),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_parent_id(&self, email_id: &str) -> Result<()> {
        let mut stored = self.points.write().map_err(poisoned)?;
        stored.retain(|_, point| point.payload.email_id != email_id);
        Ok(())
    }

    async fn collection_stats(&self) -> Result<CollectionStats> {
        let stored = self.points.read().map_err(poisoned)?;
        let count = stored.len() as u64;
        Ok(CollectionStats {
            point_count: count,
            vector_count: count,
            status: "green".to_string(),
        })
    }
}
