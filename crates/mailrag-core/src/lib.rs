//! # mailrag core
//!
//! The algorithmic core of mailrag: turning raw mail payloads into clean
//! text, splitting that text into overlapping chunks, indexing the chunks
//! as vectors, and ranking vector hits back into per-message results.
//!
//! This crate holds no database, HTTP, or filesystem code. The embedding
//! provider and the vector store are reached through the
//! [`embedding::EmbeddingProvider`] and [`store::VectorStore`] traits; the
//! application crate supplies the concrete implementations.
//!
//! ```text
//! RawMessage ──▶ normalize ──▶ NormalizedMessage ──▶ Indexer ──▶ VectorStore
//!                                                   (chunk+embed)
//! query ──▶ Retriever ──▶ EmbeddingProvider ──▶ VectorStore ──▶ rank ──▶ RankedResult
//! ```

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod normalize;
pub mod search;
pub mod store;

/// Boxed cause carried by the typed errors of the indexer and retriever.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
