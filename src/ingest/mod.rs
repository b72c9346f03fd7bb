// Ingestion orchestrator: chunk, embed, then swap the document's entries in
// the index. Embedding happens entirely before the index is touched, so a
// failed run leaves previously indexed content intact.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::chunker::{ChunkerConfig, chunk_text};
use crate::embeddings::Embedder;
use crate::index::{EntryMetadata, IndexEntry, VectorIndex};
use crate::loader::{LoadedDocument, list_supported_files, load_path};
use crate::{RagError, Result};

/// Counters accumulated over one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    /// Documents that failed to load or ingest and were skipped
    pub failures: usize,
}

pub struct Ingestor {
    embedder: Box<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    chunking: ChunkerConfig,
    /// One lock per source id; concurrent ingests of the same document
    /// would interleave delete and insert
    source_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    show_progress: bool,
}

impl Ingestor {
    #[inline]
    pub fn new(
        embedder: Box<dyn Embedder>,
        index: Box<dyn VectorIndex>,
        chunking: ChunkerConfig,
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
            chunking,
            source_locks: Mutex::new(HashMap::new()),
            show_progress: false,
        })
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Ingest one document, replacing whatever the index held for its
    /// source id. Re-running with unchanged input leaves the index in the
    /// same state.
    #[inline]
    pub async fn ingest_document(&self, document: &LoadedDocument) -> Result<IngestStats> {
        info!("Ingesting document '{}'", document.source_id);

        let chunks = chunk_text(&document.text, &self.chunking)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let created_at = chrono::Utc::now().to_rfc3339();
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors) {
            entries.push(IndexEntry {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                metadata: EntryMetadata {
                    source_id: document.source_id.clone(),
                    title: document.title.clone(),
                    content: chunk.text.clone(),
                    token_count: chunk.token_count as u32,
                    chunk_index: chunk.chunk_index as u32,
                    created_at: created_at.clone(),
                },
            });
        }

        let lock = self.source_lock(&document.source_id).await;
        let _guard = lock.lock().await;

        self.index.delete_by_source(&document.source_id).await?;
        self.index.upsert(entries).await?;

        info!(
            "Indexed {} chunks for '{}'",
            chunks.len(),
            document.source_id
        );

        Ok(IngestStats {
            documents_processed: 1,
            chunks_created: chunks.len(),
            embeddings_generated: chunks.len(),
            failures: 0,
        })
    }

    /// Load and ingest a single file.
    #[inline]
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestStats> {
        let document = load_path(path)?;
        self.ingest_document(&document).await
    }

    /// Ingest every supported file in a directory. A document that fails is
    /// logged and counted; the rest of the run continues.
    #[inline]
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestStats> {
        let paths = list_supported_files(dir)?;
        info!("Ingesting {} documents from {}", paths.len(), dir.display());

        let bar = if self.show_progress {
            ProgressBar::new(paths.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Ingesting {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut stats = IngestStats::default();
        for path in paths {
            bar.set_message(
                path.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string(),
            );

            match self.ingest_path(&path).await {
                Ok(doc_stats) => {
                    stats.documents_processed += doc_stats.documents_processed;
                    stats.chunks_created += doc_stats.chunks_created;
                    stats.embeddings_generated += doc_stats.embeddings_generated;
                }
                Err(e) => {
                    warn!("skipping {}: {}", path.display(), e);
                    stats.failures += 1;
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            "Ingestion finished: {} documents, {} chunks, {} failures",
            stats.documents_processed, stats.chunks_created, stats.failures
        );
        Ok(stats)
    }

    async fn source_lock(&self, source_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.source_locks.lock().await;
        locks
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
