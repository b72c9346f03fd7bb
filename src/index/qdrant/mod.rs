
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{EntryMetadata, IndexEntry, ScoredChunk, VectorIndex, next_seq, rank_results};
use crate::config::Config;
use crate::http::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, HttpFailure, agent_with_timeout,
    request_with_retry,
};
use crate::{RagError, Result};

/// Managed vector index backed by a Qdrant server over HTTP.
pub struct QdrantIndex {
    base_url: Url,
    collection: String,
    dimension: usize,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct UpsertPointsRequest {
    points: Vec<Point>,
}

#[derive(Debug, Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointPayload {
    #[serde(flatten)]
    metadata: EntryMetadata,
    seq: u64,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: PointPayload,
}

#[derive(Debug, Serialize)]
struct DeletePointsRequest {
    filter: Filter,
}

#[derive(Debug, Serialize)]
struct Filter {
    must: Vec<FieldCondition>,
}

#[derive(Debug, Serialize)]
struct FieldCondition {
    key: String,
    r#match: MatchValue,
}

#[derive(Debug, Serialize)]
struct MatchValue {
    value: String,
}

#[derive(Debug, Serialize)]
struct CountRequest {
    exact: bool,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

impl QdrantIndex {
    /// Connect to the server and ensure the collection exists with the
    /// configured vector dimension. An existing collection created with a
    /// different dimension is rejected.
    #[inline]
    pub fn open(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.index.url).map_err(|_| {
            RagError::InvalidConfiguration(format!("invalid Qdrant URL: {}", config.index.url))
        })?;

        let index = Self {
            base_url,
            collection: config.index.collection.clone(),
            dimension: config.embedding.dimension,
            api_key: std::env::var(&config.index.api_key_env).ok(),
            agent: agent_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        };

        index.ensure_collection()?;
        Ok(index)
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn ensure_collection(&self) -> Result<()> {
        debug!("Checking Qdrant collection '{}'", self.collection);

        match self.collection_dimension()? {
            Some(existing) if existing != self.dimension => Err(RagError::SchemaConflict(format!(
                "collection '{}' stores {}-dimension vectors, configuration says {}",
                self.collection, existing, self.dimension
            ))),
            Some(_) => Ok(()),
            None => {
                self.create_collection()?;
                info!(
                    "Created collection '{}' with {} dimensions",
                    self.collection, self.dimension
                );
                Ok(())
            }
        }
    }

    /// Vector dimension of the existing collection, or `None` when the
    /// collection does not exist yet.
    fn collection_dimension(&self) -> Result<Option<usize>> {
        let url = self.collection_url("")?;
        let response_text = match self.execute(|| {
            self.with_key(self.agent.get(url.as_str()))
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        }) {
            Ok(text) => text,
            Err(HttpFailure::Client(msg)) if msg == "HTTP 404" => return Ok(None),
            Err(e) => return Err(index_error("cannot inspect collection", e)),
        };

        let info: CollectionInfoResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::IndexUnavailable(format!("unexpected collection info response: {}", e))
        })?;
        Ok(Some(info.result.config.params.vectors.size))
    }

    fn create_collection(&self) -> Result<()> {
        let request = CreateCollectionRequest {
            vectors: VectorParams {
                size: self.dimension,
                distance: "Cosine".to_string(),
            },
        };
        let url = self.collection_url("")?;
        let body = to_json(&request)?;

        self.execute(|| {
            self.with_key(self.agent.put(url.as_str()))
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| index_error("cannot create collection", e))?;

        Ok(())
    }

    fn drop_collection(&self) -> Result<()> {
        let url = self.collection_url("")?;
        self.execute(|| {
            self.with_key(self.agent.delete(url.as_str()))
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| index_error("cannot drop collection", e))?;
        Ok(())
    }

    fn collection_url(&self, suffix: &str) -> Result<Url> {
        let path = format!("/collections/{}{}", self.collection, suffix);
        self.base_url.join(&path).map_err(|e| {
            RagError::InvalidConfiguration(format!("cannot build Qdrant URL {}: {}", path, e))
        })
    }

    fn with_key<B>(&self, mut builder: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    fn execute<F>(&self, request: F) -> std::result::Result<String, HttpFailure>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        request_with_retry(self.retry_attempts, request)
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            debug!("No entries to store");
            return Ok(());
        }

        debug!("Storing batch of {} entries", entries.len());

        let mut points = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(RagError::SchemaConflict(format!(
                    "entry '{}' has a {}-dimension vector, index expects {}",
                    entry.id,
                    entry.vector.len(),
                    self.dimension
                )));
            }
            points.push(Point {
                id: entry.id,
                vector: entry.vector,
                payload: PointPayload {
                    metadata: entry.metadata,
                    seq: next_seq(),
                },
            });
        }

        // wait=true makes the whole batch visible before we return
        let url = self.collection_url("/points?wait=true")?;
        let body = to_json(&UpsertPointsRequest { points })?;

        self.execute(|| {
            self.with_key(self.agent.put(url.as_str()))
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| index_error("cannot insert entries", e))?;

        Ok(())
    }

    #[inline]
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(RagError::SchemaConflict(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        debug!("Searching for similar vectors with limit: {}", k);

        let url = self.collection_url("/points/search")?;
        let body = to_json(&SearchRequest {
            vector: vector.to_vec(),
            limit: k,
            with_payload: true,
        })?;

        let response_text = self
            .execute(|| {
                self.with_key(self.agent.post(url.as_str()))
                    .header("Content-Type", "application/json")
                    .send(&body)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .map_err(|e| index_error("cannot execute search", e))?;

        let response: SearchResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::IndexUnavailable(format!("unexpected search response: {}", e))
        })?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            // Qdrant reports raw cosine similarity in [-1, 1]; rescale to
            // [0, 1] to match the embedded backend.
            let score = ((point.score + 1.0) / 2.0).clamp(0.0, 1.0);
            results.push((
                ScoredChunk {
                    metadata: point.payload.metadata,
                    score,
                },
                point.payload.seq,
            ));
        }

        rank_results(&mut results);
        results.truncate(k);
        Ok(results.into_iter().map(|(chunk, _)| chunk).collect())
    }

    #[inline]
    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        debug!("Deleting entries for source: {}", source_id);

        let url = self.collection_url("/points/delete?wait=true")?;
        let body = to_json(&DeletePointsRequest {
            filter: Filter {
                must: vec![FieldCondition {
                    key: "source_id".to_string(),
                    r#match: MatchValue {
                        value: source_id.to_string(),
                    },
                }],
            },
        })?;

        self.execute(|| {
            self.with_key(self.agent.post(url.as_str()))
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| index_error("cannot delete entries", e))?;

        Ok(())
    }

    #[inline]
    async fn clear(&self) -> Result<()> {
        info!("Clearing collection '{}'", self.collection);
        self.drop_collection()?;
        self.create_collection()
    }

    #[inline]
    async fn count(&self) -> Result<u64> {
        let url = self.collection_url("/points/count")?;
        let body = to_json(&CountRequest { exact: true })?;

        let response_text = self
            .execute(|| {
                self.with_key(self.agent.post(url.as_str()))
                    .header("Content-Type", "application/json")
                    .send(&body)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .map_err(|e| index_error("cannot count entries", e))?;

        let response: CountResponse = serde_json::from_str(&response_text)
            .map_err(|e| RagError::IndexUnavailable(format!("unexpected count response: {}", e)))?;
        Ok(response.result.count)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| RagError::IndexUnavailable(format!("serialize request: {}", e)))
}

fn index_error(context: &str, failure: HttpFailure) -> RagError {
    match failure {
        HttpFailure::Auth(status) => {
            RagError::InvalidCredential(format!("{}: HTTP {}", context, status))
        }
        HttpFailure::Client(msg) | HttpFailure::Exhausted(msg) => {
            RagError::IndexUnavailable(format!("{}: {}", context, msg))
        }
    }
}
