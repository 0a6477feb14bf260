//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is everything the indexer and retriever need
//! from a nearest-neighbour backend. The app crate provides a Qdrant
//! implementation; [`memory::InMemoryVectorStore`] backs tests and local
//! experiments.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CollectionStats, IndexPoint, SearchHit};

/// Abstract vector store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace points by id |
/// | [`query`](VectorStore::query) | Nearest neighbours above a score floor |
/// | [`delete_by_parent_id`](VectorStore::delete_by_parent_id) | Drop every point of one message |
/// | [`collection_stats`](VectorStore::collection_stats) | Point and vector counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace `points`, keyed by point id.
    ///
    /// Must not return `Ok` before the backend has acknowledged that the
    /// points are persisted.
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()>;

    /// Up to `limit` hits scoring at least `score_threshold`, best first.
    async fn query(&self, vector: &[f32], limit: usize, score_threshold: f32)
        -> Result<Vec<SearchHit>>;

    /// Remove all points whose payload `email_id` equals `email_id`.
    async fn delete_by_parent_id(&self, email_id: &str) -> Result<()>;

    async fn collection_stats(&self) -> Result<CollectionStats>;
}
