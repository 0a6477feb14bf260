//! Core data models that flow through the indexing and retrieval pipeline.
//!
//! Vector-store payloads are fixed structs here; they are converted to and
//! from JSON only at the store boundary.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mail message after body extraction and date resolution.
///
/// Created once per fetched raw message and never mutated by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Provider-assigned message identifier.
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    /// Sender, verbatim from the `From` header.
    pub from: String,
    /// Recipients from the `To` header.
    pub to: Vec<String>,
    /// Plain-text body. Empty, or free of markup with entities decoded.
    pub body: String,
    pub snippet: String,
    /// Resolved timestamp. `None` only when neither the `Date` header nor
    /// the provider's internal timestamp was usable.
    pub date: Option<DateTime<FixedOffset>>,
}

/// A window of a message's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Identifier of the parent message.
    pub parent_id: String,
    /// Zero-based position within the parent.
    pub position: usize,
    pub text: String,
}

/// A vector ready to be upserted into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    /// Deterministic identifier derived from `(email_id, chunk_position)`.
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Payload stored alongside each vector.
///
/// Field names are part of the store's wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub email_id: String,
    pub subject: String,
    pub from: String,
    /// RFC-3339 timestamp; omitted when the message has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub chunk_position: usize,
    pub content: String,
}

/// A raw nearest-neighbour hit returned by the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    /// Similarity score; higher is more relevant.
    pub score: f32,
    pub payload: HitPayload,
}

/// The payload subset the retriever reads back from a hit.
///
/// Every field is optional: stores may return points written by other
/// tools, and validation happens in the retriever.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitPayload {
    pub email_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub content: Option<String>,
    pub chunk_position: Option<i64>,
}

impl HitPayload {
    /// Read the known fields out of a JSON payload map.
    ///
    /// Fields that are missing or hold a non-string value read as `None`.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let text = |key: &str| map.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Self {
            email_id: text("email_id"),
            subject: text("subject"),
            from: text("from"),
            content: text("content"),
            chunk_position: map.get("chunk_position").and_then(|v| v.as_i64()),
        }
    }
}

impl From<&PointPayload> for HitPayload {
    fn from(payload: &PointPayload) -> Self {
        Self {
            email_id: Some(payload.email_id.clone()),
            subject: Some(payload.subject.clone()),
            from: Some(payload.from.clone()),
            content: Some(payload.content.clone()),
            chunk_position: i64::try_from(payload.chunk_position).ok(),
        }
    }
}

/// One message in a ranked search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub email_id: String,
    /// Best score among the message's hits.
    pub score: f32,
    pub subject: String,
    pub from: String,
    /// Text of the best-scoring chunk.
    pub snippet: String,
}

/// Point and vector counts reported by a vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub point_count: u64,
    pub vector_count: u64,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_names() {
        let payload = PointPayload {
            email_id: "m1".to_string(),
            subject: "Hello".to_string(),
            from: "a@example.com".to_string(),
            date: Some("2026-01-26T13:31:54-08:00".to_string()),
            chunk_position: 2,
            content: "body".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "email_id": "m1",
                "subject": "Hello",
                "from": "a@example.com",
                "date": "2026-01-26T13:31:54-08:00",
                "chunk_position": 2,
                "content": "body",
            })
        );
    }

    #[test]
    fn test_payload_without_date_omits_field() {
        let payload = PointPayload {
            email_id: "m1".to_string(),
            subject: String::new(),
            from: String::new(),
            date: None,
            chunk_position: 0,
            content: String::new(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("date").is_none());
    }

    #[test]
    fn test_hit_payload_ignores_mistyped_fields() {
        let value = json!({ "email_id": 42, "subject": "S", "from": null, "chunk_position": 3 });
        let payload = HitPayload::from_json(value.as_object().unwrap());
        assert_eq!(payload.email_id, None);
        assert_eq!(payload.subject.as_deref(), Some("S"));
        assert_eq!(payload.from, None);
        assert_eq!(payload.chunk_position, Some(3));
    }
}
