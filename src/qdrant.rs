//! Qdrant vector store over its REST API.
//!
//! Implements [`VectorStore`] against one collection. Writes and deletes
//! pass `wait=true` so that a successful return means Qdrant has applied
//! the operation.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mailrag_core::models::{CollectionStats, HitPayload, IndexPoint, SearchHit};
use mailrag_core::store::VectorStore;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::VectorStoreConfig;

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.resolved_api_key(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection with cosine distance if it does not exist.
    ///
    /// An existing collection is left alone; a vector size mismatch then
    /// surfaces as an upsert error.
    pub async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let response = self
            .request(self.client.get(self.collection_url()))
            .send()
            .await
            .with_context(|| format!("Failed to reach Qdrant at {}", self.base_url))?;

        if response.status().is_success() {
            debug!(collection = %self.collection, "Collection exists");
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Qdrant error {}: {}", status, body);
        }

        let body = json!({
            "vectors": { "size": dims, "distance": "Cosine" }
        });
        self.send_json(self.client.put(self.collection_url()), &body)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection))?;
        info!(collection = %self.collection, dims, "Created collection");
        Ok(())
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send_json(&self, builder: RequestBuilder, body: &Value) -> Result<Value> {
        let response = self.request(builder).json(body).send().await?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Qdrant error {}: {}", status, body);
    }
    Ok(response.json().await?)
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let body = upsert_body(points)?;
        let url = format!("{}/points?wait=true", self.collection_url());
        self.send_json(self.client.put(url), &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let body = json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        let url = format!("{}/points/search", self.collection_url());
        let json = self.send_json(self.client.post(url), &body).await?;
        parse_search_response(&json)
    }

    async fn delete_by_parent_id(&self, email_id: &str) -> Result<()> {
        let body = json!({
            "filter": {
                "must": [{ "key": "email_id", "match": { "value": email_id } }]
            }
        });
        let url = format!("{}/points/delete?wait=true", self.collection_url());
        self.send_json(self.client.post(url), &body).await?;
        Ok(())
    }

    async fn collection_stats(&self) -> Result<CollectionStats> {
        let response = self
            .request(self.client.get(self.collection_url()))
            .send()
            .await?;
        let json = read_response(response).await?;
        parse_collection_info(&json)
    }
}

fn upsert_body(points: &[IndexPoint]) -> Result<Value> {
    let points = points
        .iter()
        .map(|p| {
            Ok(json!({
                "id": p.id.to_string(),
                "vector": p.vector,
                "payload": serde_json::to_value(&p.payload)?,
            }))
        })
        .collect::<Result<Vec<Value>>>()?;
    Ok(json!({ "points": points }))
}

fn parse_search_response(json: &Value) -> Result<Vec<SearchHit>> {
    let results = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result array"))?;

    let mut hits = Vec::with_capacity(results.len());
    for item in results {
        let id = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("Invalid Qdrant response: point without id"),
        };
        let score = item
            .get("score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow!("Invalid Qdrant response: point {} without score", id))?;
        let payload = item
            .get("payload")
            .and_then(|p| p.as_object())
            .map(HitPayload::from_json)
            .unwrap_or_default();

        hits.push(SearchHit {
            id,
            score: score as f32,
            payload,
        });
    }
    Ok(hits)
}

fn parse_collection_info(json: &Value) -> Result<CollectionStats> {
    let result = json
        .get("result")
        .ok_or_else(|| anyhow!("Invalid Qdrant response: missing result"))?;
    let count = |key: &str| result.get(key).and_then(|v| v.as_u64());

    Ok(CollectionStats {
        point_count: count("points_count").unwrap_or(0),
        vector_count: count("indexed_vectors_count")
            .or_else(|| count("vectors_count"))
            .unwrap_or(0),
        status: result
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailrag_core::index::point_id;
    use mailrag_core::models::PointPayload;

    #[test]
    fn test_search_response_parsing() {
        let json = json!({
            "result": [
                {
                    "id": "73e9a4b7-fb12-35c3-b641-77a65098a4a6",
                    "score": 0.82,
                    "payload": {
                        "email_id": "18c0abc",
                        "subject": "Invoice",
                        "from": "billing@example.com",
                        "chunk_position": 0,
                        "content": "Subject: Invoice"
                    }
                },
                { "id": 42, "score": 0.3 }
            ],
            "status": "ok"
        });

        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.email_id.as_deref(), Some("18c0abc"));
        assert_eq!(hits[0].payload.chunk_position, Some(0));
        assert!((hits[0].score - 0.82).abs() < 1e-6);
        assert_eq!(hits[1].id, "42");
        assert_eq!(hits[1].payload, HitPayload::default());
    }

    #[test]
    fn test_search_response_without_result_is_error() {
        assert!(parse_search_response(&json!({"status": "ok"})).is_err());
    }

    #[test]
    fn test_collection_info_parsing() {
        let json = json!({
            "result": {
                "status": "green",
                "points_count": 120,
                "indexed_vectors_count": 100,
                "segments_count": 2
            }
        });
        let stats = parse_collection_info(&json).unwrap();
        assert_eq!(stats.point_count, 120);
        assert_eq!(stats.vector_count, 100);
        assert_eq!(stats.status, "green");

        let legacy = json!({"result": {"points_count": 3, "vectors_count": 3}});
        let stats = parse_collection_info(&legacy).unwrap();
        assert_eq!(stats.vector_count, 3);
        assert_eq!(stats.status, "unknown");
    }

    #[test]
    fn test_upsert_body_shape() {
        let point = IndexPoint {
            id: point_id("18c0abc", 0),
            vector: vec![0.5, 0.5],
            payload: PointPayload {
                email_id: "18c0abc".to_string(),
                subject: "Invoice".to_string(),
                from: "billing@example.com".to_string(),
                date: None,
                chunk_position: 0,
                content: "Subject: Invoice".to_string(),
            },
        };
        let body = upsert_body(&[point]).unwrap();
        let first = &body["points"][0];
        assert_eq!(first["id"], "73e9a4b7-fb12-35c3-b641-77a65098a4a6");
        assert_eq!(first["payload"]["email_id"], "18c0abc");
        assert!(first["payload"].get("date").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = VectorStoreConfig {
            url: "http://qdrant:6333/".to_string(),
            ..Default::default()
        };
        let store = QdrantStore::new(&config).unwrap();
        assert_eq!(store.collection_url(), "http://qdrant:6333/collections/emails");
    }
}
