// Vector index abstraction with two interchangeable backends: an embedded
// LanceDB store and a managed Qdrant service. Callers see identical ranking
// semantics from both; score normalization lives inside each adapter.

pub mod lance;
pub mod qdrant;

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::{Config, IndexBackend};

pub use lance::LanceIndex;
pub use qdrant::QdrantIndex;

/// Entry persisted in the vector index: one chunk, its embedding, and the
/// metadata needed to cite it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique identifier for this entry
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// Metadata stored alongside each embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Identity of the document this chunk came from
    pub source_id: String,
    /// Human-readable label used for citations
    pub title: String,
    /// The chunk text itself
    pub content: String,
    pub token_count: u32,
    /// Position of the chunk within its document
    pub chunk_index: u32,
    pub created_at: String,
}

/// One retrieved chunk with its similarity score normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub metadata: EntryMetadata,
    pub score: f32,
}

/// Uniform contract over both index backends. Implementations must rank by
/// cosine similarity normalized to [0, 1] and break score ties by insertion
/// order (earlier entries first) so results are deterministic.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Vector dimension this index was created with.
    fn dimension(&self) -> usize;

    /// Insert entries. A batch is visible to subsequent queries as a whole.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Top-k similarity search; returns at most `k` results, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove every entry belonging to a source. No-op when none match.
    async fn delete_by_source(&self, source_id: &str) -> Result<()>;

    /// Remove all entries.
    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<u64>;
}

/// Open the index backend selected by the configuration. Fails with
/// `SchemaConflict` when existing stored data was created with a different
/// vector dimension.
#[inline]
pub async fn open_index(config: &Config) -> Result<Box<dyn VectorIndex>> {
    match config.index.backend {
        IndexBackend::Embedded => Ok(Box::new(LanceIndex::open(config).await?)),
        IndexBackend::Managed => Ok(Box::new(QdrantIndex::open(config)?)),
    }
}

/// Monotonic insertion counter used as the ranking tie-break. Seeded from
/// the wall clock so entries inserted by later processes sort after those
/// from earlier ones.
pub(crate) fn next_seq() -> u64 {
    static SEQ: OnceLock<AtomicU64> = OnceLock::new();
    SEQ.get_or_init(|| AtomicU64::new(chrono::Utc::now().timestamp_micros().unsigned_abs()))
        .fetch_add(1, Ordering::Relaxed)
}

/// Order results best-first: score descending, insertion order ascending on
/// ties. Shared by both backends so ranking semantics stay identical.
pub(crate) fn rank_results(results: &mut [(ScoredChunk, u64)]) {
    results.sort_by(|(a, a_seq), (b, b_seq)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a_seq.cmp(b_seq))
    });
}
