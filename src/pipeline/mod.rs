// Query pipeline: embed the question, retrieve the closest chunks, assemble
// a budgeted context window, and generate a cited answer.

pub mod citations;


use std::fmt;

use tracing::{debug, info};

use crate::chunker::estimate_tokens;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::generator::{Generator, TokenUsage};
use crate::index::{ScoredChunk, VectorIndex};
use crate::{RagError, Result};

pub use citations::{Citation, extract_citations};

/// Where a query currently is in its lifecycle; used for progress logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Received,
    Embedding,
    Searching,
    ContextAssembled,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Embedding => "embedding",
            Self::Searching => "searching",
            Self::ContextAssembled => "context-assembled",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final answer produced by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Sources the answer actually cites, in order of first mention
    pub citations: Vec<Citation>,
    pub usage: TokenUsage,
}

pub struct QueryPipeline {
    embedder: Box<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    generator: Box<dyn Generator>,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    /// Wire the three stages together. The embedder and index must agree on
    /// vector dimension; a mismatch here would only surface later as garbage
    /// search results.
    #[inline]
    pub fn new(
        embedder: Box<dyn Embedder>,
        index: Box<dyn VectorIndex>,
        generator: Box<dyn Generator>,
        retrieval: RetrievalConfig,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(RagError::SchemaConflict(format!(
                "embedder produces {}-dimension vectors, index stores {}",
                embedder.dimension(),
                index.dimension()
            )));
        }

        Ok(Self {
            embedder,
            index,
            generator,
            retrieval,
        })
    }

    /// Answer a question from the indexed documents.
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidConfiguration(
                "question cannot be empty".to_string(),
            ));
        }

        debug!(phase = %QueryPhase::Received, "Handling query ({} chars)", question.len());

        let result = self.run(question).await;
        match &result {
            Ok(answer) => info!(
                phase = %QueryPhase::Completed,
                "Answered with {} citations", answer.citations.len()
            ),
            Err(e) => debug!(phase = %QueryPhase::Failed, "Query failed: {}", e),
        }
        result
    }

    async fn run(&self, question: &str) -> Result<Answer> {
        debug!(phase = %QueryPhase::Embedding, "Embedding question");
        let query_vector = self.embedder.embed(question)?;

        debug!(phase = %QueryPhase::Searching, "Retrieving top {} chunks", self.retrieval.top_k);
        let retrieved = self.index.query(&query_vector, self.retrieval.top_k).await?;

        let context = assemble_context(retrieved, self.retrieval.context_budget_tokens);
        debug!(
            phase = %QueryPhase::ContextAssembled,
            "Context holds {} chunks", context.len()
        );

        debug!(phase = %QueryPhase::Generating, "Generating answer");
        let generation = self.generator.generate(question, &context)?;

        let citations = extract_citations(&generation.text, &context);

        Ok(Answer {
            text: generation.text,
            citations,
            usage: generation.usage,
        })
    }
}

/// Trim retrieved chunks to the context token budget. Chunks are taken best
/// first; once one would overflow the budget, it and everything ranked below
/// it are dropped.
fn assemble_context(retrieved: Vec<ScoredChunk>, budget_tokens: usize) -> Vec<ScoredChunk> {
    let mut context = Vec::with_capacity(retrieved.len());
    let mut used_tokens = 0;

    for chunk in retrieved {
        let chunk_tokens = estimate_tokens(&chunk.metadata.content);
        if used_tokens + chunk_tokens > budget_tokens {
            break;
        }
        used_tokens += chunk_tokens;
        context.push(chunk);
    }

    context
}
