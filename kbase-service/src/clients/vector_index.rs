//! Similarity-search index holding one point per chunk.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::check_status;
use super::embeddings::cosine_similarity;
use crate::config::{VectorIndexBackend, VectorIndexConfig};
use crate::error::{ClientError, ServiceError, ServiceResult};

/// A point to store: id, vector and an opaque payload
#[derive(Debug, Clone, Serialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A search hit
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Exact-match conditions on payload fields, all of which must hold
#[derive(Debug, Clone, Default)]
pub struct PayloadFilter {
    pub must: Vec<(String, Value)>,
}

impl PayloadFilter {
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push((key.into(), value.into()));
        self
    }

    fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must
            .iter()
            .all(|(key, value)| payload.get(key) == Some(value))
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the backing collection if it does not exist yet
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ClientError>;

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError>;

    /// Remove points by id; unknown ids are ignored
    async fn delete(&self, ids: &[String]) -> Result<(), ClientError>;

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError>;
}

/// Build the configured index backend
pub fn create_vector_index(config: &VectorIndexConfig) -> ServiceResult<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.backend {
        VectorIndexBackend::Qdrant => {
            info!(url = %config.url, collection = %config.collection, "Using Qdrant vector index");
            Arc::new(QdrantIndex::new(config)?)
        }
        VectorIndexBackend::Memory => {
            info!("Using in-memory vector index");
            Arc::new(MemoryVectorIndex::new())
        }
    };
    Ok(index)
}

// ==================== Qdrant ====================

/// Qdrant REST client for a single collection
pub struct QdrantIndex {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    distance: String,
}

#[derive(Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantScoredPoint>,
}

#[derive(Deserialize)]
struct QdrantScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl QdrantIndex {
    pub fn new(config: &VectorIndexConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            distance: config.distance.clone(),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ClientError::Connection {
                url: url.to_string(),
                source: e,
            })?;
        check_status(url, response).await
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ClientError> {
        let url = self.collection_url("");

        let existing = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ClientError::Connection {
                url: url.clone(),
                source: e,
            })?;
        if existing.status().is_success() {
            return Ok(());
        }

        let body = json!({
            "vectors": { "size": vector_size, "distance": self.distance }
        });
        self.send(&url, self.client.put(&url).json(&body)).await?;
        info!(collection = %self.collection, vector_size, "Created vector collection");
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError> {
        if points.is_empty() {
            return Ok(());
        }

        let url = self.collection_url("/points?wait=true");
        let count = points.len();
        self.send(&url, self.client.put(&url).json(&json!({ "points": points })))
            .await?;

        debug!(collection = %self.collection, count, "Upserted points");
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), ClientError> {
        if ids.is_empty() {
            return Ok(());
        }

        let url = self.collection_url("/points/delete?wait=true");
        self.send(&url, self.client.post(&url).json(&json!({ "points": ids })))
            .await?;

        debug!(collection = %self.collection, count = ids.len(), "Deleted points");
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError> {
        let url = self.collection_url("/points/search");

        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if !filter.must.is_empty() {
            let must: Vec<Value> = filter
                .must
                .iter()
                .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
                .collect();
            body["filter"] = json!({ "must": must });
        }

        let response: QdrantSearchResponse = self
            .send(&url, self.client.post(&url).json(&body))
            .await?
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(response
            .result
            .into_iter()
            .map(|p| ScoredPoint {
                id: match p.id {
                    Value::String(s) => s,
                    other => other.to_string(),
                },
                score: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }
}

// ==================== In-memory ====================

struct StoredPoint {
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

/// In-process index with brute-force cosine search
#[derive(Default)]
pub struct MemoryVectorIndex {
    points: DashMap<String, StoredPoint>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.points.contains_key(id)
    }

    pub fn payload(&self, id: &str) -> Option<Map<String, Value>> {
        self.points.get(id).map(|p| p.payload.clone())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, _vector_size: usize) -> Result<(), ClientError> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError> {
        for point in points {
            self.points.insert(
                point.id,
                StoredPoint {
                    vector: point.vector,
                    payload: point.payload,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<(), ClientError> {
        for id in ids {
            self.points.remove(id);
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError> {
        let mut hits: Vec<ScoredPoint> = self
            .points
            .iter()
            .filter(|entry| filter.matches(&entry.payload))
            .map(|entry| ScoredPoint {
                id: entry.key().clone(),
                score: cosine_similarity(vector, &entry.vector),
                payload: entry.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
