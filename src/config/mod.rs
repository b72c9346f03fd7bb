
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chunker::ChunkerConfig;
use crate::{RagError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which embedder implementation to use; fixed at process start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Ollama running on this machine
    Local,
    /// OpenAI-compatible hosted endpoint
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub url: String,
    pub model: String,
    /// Vector dimension produced by the model; must match the index
    pub dimension: usize,
    /// Texts per embedding request
    pub batch_size: usize,
    /// Environment variable holding the API key (remote provider)
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text:latest".to_string(),
            dimension: 768,
            batch_size: 16,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Which vector index backend to use; fixed at process start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// LanceDB persisted under the base directory
    Embedded,
    /// Qdrant reached over HTTP
    Managed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Collection (managed) or table (embedded) name
    pub collection: String,
    /// Endpoint of the managed backend
    pub url: String,
    /// Environment variable holding the managed backend's API key, if any
    pub api_key_env: String,
}

impl Default for IndexConfig {
    #[inline]
    fn default() -> Self {
        Self {
            backend: IndexBackend::Embedded,
            collection: "documents".to_string(),
            url: "http://localhost:6333".to_string(),
            api_key_env: "QDRANT_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub url: String,
    pub model: String,
    pub max_tokens: u32,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for GeneratorConfig {
    #[inline]
    fn default() -> Self {
        Self {
            url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query
    pub top_k: usize,
    /// Token budget for the assembled context window
    pub context_budget_tokens: usize,
}

impl Default for RetrievalConfig {
    #[inline]
    fn default() -> Self {
        Self {
            top_k: 5,
            context_budget_tokens: 2000,
        }
    }
}

impl Config {
    /// Load configuration from `<base_dir>/config.toml`, falling back to
    /// defaults when the file does not exist. Validation failures are fatal.
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .map_err(|e| RagError::InvalidConfiguration(format!("{}: {}", config_path.display(), e)))?
        } else {
            Config::default()
        };
        config.base_dir = base_dir.as_ref().to_path_buf();

        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()?;

        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| RagError::InvalidConfiguration(format!("serialize config: {}", e)))?;
        fs::write(self.base_dir.join("config.toml"), content)
            .with_context(|| format!("Failed to write config to {}", self.base_dir.display()))?;

        Ok(())
    }

    /// Directory where the embedded vector index persists its data.
    #[inline]
    pub fn vector_db_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.embedding.model.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "embedding model cannot be empty".to_string(),
            ));
        }
        if !(64..=4096).contains(&self.embedding.dimension) {
            return Err(RagError::InvalidConfiguration(format!(
                "embedding dimension {} out of range (64..=4096)",
                self.embedding.dimension
            )));
        }
        if self.embedding.batch_size == 0 || self.embedding.batch_size > 1000 {
            return Err(RagError::InvalidConfiguration(format!(
                "embedding batch size {} out of range (1..=1000)",
                self.embedding.batch_size
            )));
        }
        validate_url("embedding.url", &self.embedding.url)?;

        if self.index.collection.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "index collection name cannot be empty".to_string(),
            ));
        }
        if self.index.backend == IndexBackend::Managed {
            validate_url("index.url", &self.index.url)?;
        }

        validate_url("generator.url", &self.generator.url)?;
        if self.generator.model.trim().is_empty() {
            return Err(RagError::InvalidConfiguration(
                "generator model cannot be empty".to_string(),
            ));
        }
        if self.generator.max_tokens == 0 {
            return Err(RagError::InvalidConfiguration(
                "generator max_tokens must be positive".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 || self.retrieval.top_k > 100 {
            return Err(RagError::InvalidConfiguration(format!(
                "retrieval top_k {} out of range (1..=100)",
                self.retrieval.top_k
            )));
        }
        if self.retrieval.context_budget_tokens < self.chunking.target_tokens {
            return Err(RagError::InvalidConfiguration(format!(
                "context budget ({}) must fit at least one chunk ({})",
                self.retrieval.context_budget_tokens, self.chunking.target_tokens
            )));
        }

        Ok(())
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            chunking: ChunkerConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            generator: GeneratorConfig::default(),
            retrieval: RetrievalConfig::default(),
            base_dir: default_base_dir(),
        }
    }
}

/// Default base directory for config and embedded index data.
#[inline]
pub fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("askdocs")
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    Url::parse(value)
        .map_err(|_| RagError::InvalidConfiguration(format!("{} is not a valid URL: {}", field, value)))?;
    Ok(())
}
