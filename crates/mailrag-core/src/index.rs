//! Message indexer: chunk, embed, and upsert.
//!
//! For each [`NormalizedMessage`] the indexer composes the text to embed,
//! strips characters the vector store may reject, chunks it, embeds every
//! chunk in one batched call, and upserts one [`IndexPoint`] per chunk in a
//! single store call.
//!
//! Point ids are a pure function of `(message id, chunk position)`, so
//! re-indexing a message overwrites its points instead of adding new ones.
//!
//! [`Indexer::index_batch`] walks many messages. A failure (or panic) while
//! indexing one message is recorded for that message and the batch goes
//! on. Cancellation is different: it stops the whole batch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::SecondsFormat;
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::chunk::{chunk_text, ChunkerConfig};
use crate::embedding::EmbeddingProvider;
use crate::models::{IndexPoint, NormalizedMessage, PointPayload};
use crate::store::VectorStore;
use crate::BoxError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("indexing cancelled")]
    Cancelled,
    #[error("failed to generate embeddings")]
    Embedding(#[source] BoxError),
    #[error("embedding provider returned {got} vectors for {expected} chunks")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("vector store upsert failed")]
    Store(#[source] BoxError),
    #[error("internal fault while indexing: {0}")]
    Fault(String),
}

/// Why a message produced no points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing left to embed after composition and sanitization.
    EmptyContent,
    /// The chunker produced no windows.
    NoChunks,
}

/// Successful result of indexing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { points: usize },
    Skipped(SkipReason),
}

/// Result for one message of a batch.
#[derive(Debug)]
pub struct ItemResult {
    pub email_id: String,
    pub result: Result<IndexOutcome, IndexError>,
}

/// Per-message results of [`Indexer::index_batch`], in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<ItemResult>,
}

impl BatchReport {
    pub fn indexed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.result, Ok(IndexOutcome::Indexed { .. })))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.result, Ok(IndexOutcome::Skipped(_))))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.result.is_err()).count()
    }

    /// Total points upserted across the batch.
    pub fn points_written(&self) -> usize {
        self.items
            .iter()
            .map(|i| match i.result {
                Ok(IndexOutcome::Indexed { points }) => points,
                _ => 0,
            })
            .sum()
    }

    /// Items that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &IndexError)> {
        self.items.iter().filter_map(|i| match &i.result {
            Err(e) => Some((i.email_id.as_str(), e)),
            Ok(_) => None,
        })
    }
}

/// Builds and upserts vector points for messages.
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkerConfig,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkerConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            chunking,
        }
    }

    /// Index one message.
    ///
    /// Embedding and store failures are returned as errors and leave the
    /// store untouched for this message.
    pub async fn index_message(
        &self,
        message: &NormalizedMessage,
    ) -> Result<IndexOutcome, IndexError> {
        let content = sanitize_text(&compose_index_text(message));
        let subject = sanitize_text(&message.subject);

        if content.trim().is_empty() {
            debug!(email_id = %message.id, "Skipping message with empty content");
            return Ok(IndexOutcome::Skipped(SkipReason::EmptyContent));
        }

        let chunks = chunk_text(&message.id, &content, &self.chunking);
        if chunks.is_empty() {
            debug!(email_id = %message.id, "Skipping message that produced no chunks");
            return Ok(IndexOutcome::Skipped(SkipReason::NoChunks));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| IndexError::Embedding(e.into()))?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::EmbeddingCount {
                expected: chunks.len(),
                got: vectors.len(),
            });
        }

        let date = message
            .date
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true));

        let points: Vec<IndexPoint> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexPoint {
                id: point_id(&message.id, chunk.position),
                vector,
                payload: PointPayload {
                    email_id: message.id.clone(),
                    subject: subject.clone(),
                    from: message.from.clone(),
                    date: date.clone(),
                    chunk_position: chunk.position,
                    content: chunk.text,
                },
            })
            .collect();

        self.store
            .upsert(&points)
            .await
            .map_err(|e| IndexError::Store(e.into()))?;

        debug!(email_id = %message.id, points = points.len(), "Upserted message points");
        Ok(IndexOutcome::Indexed {
            points: points.len(),
        })
    }

    /// Index `messages` in order.
    ///
    /// Each message gets its own [`ItemResult`]; a failing or panicking
    /// message does not stop the others. `cancel` is checked before every
    /// message and raced against the one in flight. Once it fires the batch
    /// stops and [`IndexError::Cancelled`] is returned.
    pub async fn index_batch(
        &self,
        messages: &[NormalizedMessage],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, IndexError> {
        let total = messages.len();
        let mut report = BatchReport::default();

        for (i, message) in messages.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(done = i, total, "Indexing cancelled");
                return Err(IndexError::Cancelled);
            }

            info!(
                progress = %format!("{}/{}", i + 1, total),
                subject = %message.subject,
                "Indexing message"
            );

            let work = AssertUnwindSafe(self.index_message(message)).catch_unwind();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(done = i, total, "Indexing cancelled");
                    return Err(IndexError::Cancelled);
                }
                outcome = work => match outcome {
                    Ok(result) => result,
                    Err(panic) => Err(IndexError::Fault(panic_message(panic))),
                },
            };

            if let Err(e) = &result {
                error!(
                    email_id = %message.id,
                    error = %error_chain(e),
                    "Failed to index message"
                );
            }
            report.items.push(ItemResult {
                email_id: message.id.clone(),
                result,
            });
        }

        info!(
            indexed = report.indexed(),
            skipped = report.skipped(),
            failed = report.failed(),
            points = report.points_written(),
            "Batch indexing finished"
        );
        Ok(report)
    }

    /// Remove every point of one message from the store.
    pub async fn delete_message(&self, email_id: &str) -> Result<(), IndexError> {
        self.store
            .delete_by_parent_id(email_id)
            .await
            .map_err(|e| IndexError::Store(e.into()))
    }
}

/// Compose the text embedded for a message.
///
/// Present fields only, separated by a blank line:
/// `Subject: …`, the body, `From …`, `Date: January 2, 2006`, `To: a,b`.
pub fn compose_index_text(message: &NormalizedMessage) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !message.subject.is_empty() {
        parts.push(format!("Subject: {}", message.subject));
    }
    if !message.body.is_empty() {
        parts.push(message.body.clone());
    }
    if !message.from.is_empty() {
        parts.push(format!("From {}", message.from));
    }
    if let Some(date) = message.date {
        parts.push(format!("Date: {}", date.format("%B %-d, %Y")));
    }
    if !message.to.is_empty() {
        let to: Vec<String> = message
            .to
            .iter()
            .map(|r| r.replace(['"', '[', ']'], ""))
            .collect();
        parts.push(format!("To: {}", to.join(",")));
    }

    parts.join("\n\n")
}

/// Drop characters a vector store may reject: U+FFFD left behind by lossy
/// decoding and control characters other than `\n`, `\r` and `\t`.
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            c != char::REPLACEMENT_CHARACTER
                && (!c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        })
        .collect()
}

/// Deterministic point id: a name-based (MD5, v3) UUID in the nil
/// namespace over `"<email_id>_<position>"`.
pub fn point_id(email_id: &str, position: usize) -> Uuid {
    Uuid::new_v3(&Uuid::nil(), format!("{}_{}", email_id, position).as_bytes())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
