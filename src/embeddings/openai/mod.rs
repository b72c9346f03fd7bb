#[cfg(test)]
mod tests;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::http::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, HttpFailure, agent_with_timeout,
    request_with_retry,
};
use crate::{RagError, Result};

/// Embedding client for an OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    batch_size: usize,
    api_key: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingObject>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingObject {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).map_err(|_| {
            RagError::InvalidConfiguration(format!("invalid embeddings URL: {}", config.url))
        })?;

        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::InvalidCredential(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size,
            api_key,
            agent: agent_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };
        let url = self.base_url.join("/v1/embeddings").map_err(|e| {
            RagError::InvalidConfiguration(format!("cannot build embeddings URL: {}", e))
        })?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::EmbeddingUnavailable(format!("serialize request: {}", e)))?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", &format!("Bearer {}", self.api_key))
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| match e {
            HttpFailure::Auth(status) => RagError::InvalidCredential(format!(
                "embedding endpoint rejected the API key (HTTP {})",
                status
            )),
            HttpFailure::Client(msg) | HttpFailure::Exhausted(msg) => {
                RagError::EmbeddingUnavailable(msg)
            }
        })?;

        let mut response: EmbeddingsResponse = serde_json::from_str(&response_text)
            .map_err(|e| {
                RagError::EmbeddingUnavailable(format!("unexpected embeddings response: {}", e))
            })?;

        if response.data.len() != texts.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "requested {} embeddings, server returned {}",
                texts.len(),
                response.data.len()
            )));
        }

        // The API may return objects out of order; index is authoritative.
        response.data.sort_by_key(|obj| obj.index);

        let mut vectors = Vec::with_capacity(response.data.len());
        for obj in response.data {
            if obj.embedding.len() != self.dimension {
                return Err(RagError::InvalidConfiguration(format!(
                    "model '{}' produced a {}-dimension vector, configuration says {}",
                    self.model,
                    obj.embedding.len(),
                    self.dimension
                )));
            }
            vectors.push(obj.embedding);
        }

        Ok(vectors)
    }
}

impl Embedder for OpenAiEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_single_batch(&[text.to_string()])?;
        vectors.pop().ok_or_else(|| {
            RagError::EmbeddingUnavailable("server returned no embedding".to_string())
        })
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            results.extend(self.embed_single_batch(batch)?);
        }

        Ok(results)
    }
}
