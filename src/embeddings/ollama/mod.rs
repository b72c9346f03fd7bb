
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::http::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, HttpFailure, agent_with_timeout,
    request_with_retry,
};
use crate::{RagError, Result};

/// Embedding client for a locally running Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    model: String,
    #[serde(rename = "input")]
    inputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).map_err(|_| {
            RagError::InvalidConfiguration(format!("invalid Ollama URL: {}", config.url))
        })?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size,
            agent: agent_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = agent_with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Verify the server is reachable and the configured model is present.
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let url = self.endpoint("/api/tags")?;
        debug!("Checking Ollama server at {}", url);

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| unavailable("health check failed", e))?;

        let models: ModelsResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::EmbeddingUnavailable(format!("unexpected /api/tags response: {}", e))
        })?;

        if !models.models.iter().any(|m| m.name == self.model) {
            return Err(RagError::InvalidConfiguration(format!(
                "model '{}' is not available; found: {:?}",
                self.model,
                models.models.iter().map(|m| m.name.as_str()).collect::<Vec<_>>()
            )));
        }

        info!(
            "Ollama server at {} is healthy with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            RagError::InvalidConfiguration(format!("cannot build Ollama URL {}: {}", path, e))
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::InvalidConfiguration(format!(
                "model '{}' produced a {}-dimension vector, configuration says {}",
                self.model,
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.len() == 1 {
            return Ok(vec![self.embed(&texts[0])?]);
        }

        let request = BatchEmbedRequest {
            model: self.model.clone(),
            inputs: texts.to_vec(),
        };
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::EmbeddingUnavailable(format!("serialize request: {}", e)))?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| unavailable("batch embedding failed", e))?;

        let batch: BatchEmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::EmbeddingUnavailable(format!("unexpected embed response: {}", e))
        })?;

        if batch.embeddings.len() != texts.len() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "requested {} embeddings, server returned {}",
                texts.len(),
                batch.embeddings.len()
            )));
        }
        for vector in &batch.embeddings {
            self.check_dimension(vector)?;
        }

        Ok(batch.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };
        let url = self.endpoint("/api/embed")?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::EmbeddingUnavailable(format!("serialize request: {}", e)))?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| unavailable("embedding failed", e))?;

        let response: EmbedResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::EmbeddingUnavailable(format!("unexpected embed response: {}", e))
        })?;

        self.check_dimension(&response.embedding)?;
        Ok(response.embedding)
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

fn unavailable(context: &str, failure: HttpFailure) -> RagError {
    match failure {
        HttpFailure::Auth(status) => {
            RagError::InvalidCredential(format!("{}: HTTP {}", context, status))
        }
        HttpFailure::Client(msg) | HttpFailure::Exhausted(msg) => {
            RagError::EmbeddingUnavailable(format!("{}: {}", context, msg))
        }
    }
}
