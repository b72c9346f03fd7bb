
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::GeneratorConfig;
use crate::http::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECONDS, HttpFailure, agent_with_timeout,
    request_with_retry,
};
use crate::index::ScoredChunk;
use crate::{RagError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = "You are a documentation assistant. Answer the question using only \
the provided context. Cite every source you draw from as [Title](source-id), using the titles \
and source ids given in the context. If the context does not contain relevant information, say \
that no relevant information was found instead of guessing.";

/// Produces an answer from a question and its retrieved context.
pub trait Generator: Send + Sync {
    fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<Generation>;
}

/// Raw model output before citation extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Generation client for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeGenerator {
    base_url: Url,
    model: String,
    max_tokens: u32,
    api_key: String,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl ClaudeGenerator {
    #[inline]
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let base_url = Url::parse(&config.url).map_err(|_| {
            RagError::InvalidConfiguration(format!("invalid generator URL: {}", config.url))
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
            max_tokens: config.max_tokens,
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
}

impl Generator for ClaudeGenerator {
    #[inline]
    fn generate(&self, question: &str, context: &[ScoredChunk]) -> Result<Generation> {
        debug!(
            "Generating answer for question ({} chars, {} context chunks)",
            question.len(),
            context.len()
        );

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: build_user_message(question, context),
            }],
        };
        let url = self.base_url.join("/v1/messages").map_err(|e| {
            RagError::InvalidConfiguration(format!("cannot build messages URL: {}", e))
        })?;
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::GenerationUnavailable(format!("serialize request: {}", e)))?;

        let response_text = request_with_retry(self.retry_attempts, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .map_err(|e| match e {
            HttpFailure::Auth(status) => RagError::InvalidCredential(format!(
                "generation endpoint rejected the API key (HTTP {})",
                status
            )),
            HttpFailure::Client(msg) | HttpFailure::Exhausted(msg) => {
                RagError::GenerationUnavailable(msg)
            }
        })?;

        let response: MessagesResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::GenerationUnavailable(format!("unexpected messages response: {}", e))
        })?;

        let text = response
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(Generation {
            text,
            usage: response.usage,
        })
    }
}

/// Assemble the user message: labeled context blocks, best match first,
/// followed by the question.
fn build_user_message(question: &str, context: &[ScoredChunk]) -> String {
    let mut message = String::new();

    if context.is_empty() {
        message.push_str("Context: (no relevant documents found)\n\n");
    } else {
        message.push_str("Context:\n\n");
        for chunk in context {
            message.push_str(&format!(
                "Source: [{}]({})\n{}\n\n",
                chunk.metadata.title, chunk.metadata.source_id, chunk.metadata.content
            ));
        }
    }

    message.push_str(&format!("Question: {}", question));
    message
}
