use async_trait::async_trait;

use super::*;
use crate::index::ScoredChunk;
use crate::loader::DocumentFormat;
use tempfile::TempDir;

struct FixedEmbedder {
    dimension: usize,
}

impl Embedder for FixedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
        Ok(vec![1.0; self.dimension])
    }

    fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; self.dimension]).collect())
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        4
    }

    fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
        Err(RagError::EmbeddingUnavailable("server is down".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingUnavailable("server is down".to_string()))
    }
}

/// In-memory index that records the order of mutating operations.
#[derive(Default)]
struct RecordingIndex {
    entries: std::sync::Mutex<Vec<IndexEntry>>,
    operations: std::sync::Mutex<Vec<String>>,
}

impl RecordingIndex {
    fn entries(&self) -> Vec<IndexEntry> {
        self.entries.lock().expect("lock ok").clone()
    }

    fn operations(&self) -> Vec<String> {
        self.operations.lock().expect("lock ok").clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    fn dimension(&self) -> usize {
        4
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> crate::Result<()> {
        self.operations
            .lock()
            .expect("lock ok")
            .push(format!("upsert {}", entries.len()));
        self.entries.lock().expect("lock ok").extend(entries);
        Ok(())
    }

    async fn query(&self, _vector: &[f32], _k: usize) -> crate::Result<Vec<ScoredChunk>> {
        Ok(Vec::new())
    }

    async fn delete_by_source(&self, source_id: &str) -> crate::Result<()> {
        self.operations
            .lock()
            .expect("lock ok")
            .push(format!("delete {}", source_id));
        self.entries
            .lock()
            .expect("lock ok")
            .retain(|e| e.metadata.source_id != source_id);
        Ok(())
    }

    async fn clear(&self) -> crate::Result<()> {
        self.entries.lock().expect("lock ok").clear();
        Ok(())
    }

    async fn count(&self) -> crate::Result<u64> {
        Ok(self.entries.lock().expect("lock ok").len() as u64)
    }
}

fn test_document(source_id: &str, text: &str) -> LoadedDocument {
    LoadedDocument {
        source_id: source_id.to_string(),
        title: source_id.trim_end_matches(".txt").to_string(),
        format: DocumentFormat::PlainText,
        text: text.to_string(),
    }
}

fn ingestor(index: Arc<RecordingIndex>) -> Ingestor {
    Ingestor::new(
        Box::new(FixedEmbedder { dimension: 4 }),
        Box::new(SharedIndex(index)),
        ChunkerConfig::default(),
    )
    .expect("ingestor ok")
}

/// Lets a test keep a handle on the index the ingestor owns.
struct SharedIndex(Arc<RecordingIndex>);

#[async_trait]
impl VectorIndex for SharedIndex {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> crate::Result<()> {
        self.0.upsert(entries).await
    }

    async fn query(&self, vector: &[f32], k: usize) -> crate::Result<Vec<ScoredChunk>> {
        self.0.query(vector, k).await
    }

    async fn delete_by_source(&self, source_id: &str) -> crate::Result<()> {
        self.0.delete_by_source(source_id).await
    }

    async fn clear(&self) -> crate::Result<()> {
        self.0.clear().await
    }

    async fn count(&self) -> crate::Result<u64> {
        self.0.count().await
    }
}

#[tokio::test]
async fn ingest_indexes_every_chunk() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = ingestor(Arc::clone(&index));

    let document = test_document("notes.txt", &"aaaa ".repeat(50));
    let stats = ingestor.ingest_document(&document).await.expect("ingest ok");

    assert_eq!(stats.documents_processed, 1);
    assert_eq!(stats.chunks_created, stats.embeddings_generated);
    assert_eq!(stats.failures, 0);

    let entries = index.entries();
    assert_eq!(entries.len(), stats.chunks_created);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.metadata.source_id, "notes.txt");
        assert_eq!(entry.metadata.title, "notes");
        assert_eq!(entry.metadata.chunk_index as usize, i);
        assert!(!entry.metadata.created_at.is_empty());
        assert_eq!(entry.vector.len(), 4);
    }
}

#[tokio::test]
async fn reingest_replaces_previous_entries() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = ingestor(Arc::clone(&index));

    let document = test_document("notes.txt", &"aaaa ".repeat(50));
    let first = ingestor.ingest_document(&document).await.expect("ingest ok");
    let second = ingestor.ingest_document(&document).await.expect("ingest ok");

    assert_eq!(first.chunks_created, second.chunks_created);
    assert_eq!(index.entries().len(), first.chunks_created);
}

#[tokio::test]
async fn old_entries_are_deleted_before_insert() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = ingestor(Arc::clone(&index));

    let document = test_document("notes.txt", "short text");
    ingestor.ingest_document(&document).await.expect("ingest ok");

    let operations = index.operations();
    assert_eq!(operations[0], "delete notes.txt");
    assert!(operations[1].starts_with("upsert"));
}

#[tokio::test]
async fn embedding_failure_leaves_index_untouched() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = Ingestor::new(
        Box::new(FailingEmbedder),
        Box::new(SharedIndex(Arc::clone(&index))),
        ChunkerConfig::default(),
    )
    .expect("ingestor ok");

    let document = test_document("notes.txt", "some text");
    let result = ingestor.ingest_document(&document).await;

    assert!(matches!(result, Err(RagError::EmbeddingUnavailable(_))));
    assert!(index.operations().is_empty());
}

#[tokio::test]
async fn reingesting_empty_document_clears_stale_entries() {
    let index = Arc::new(RecordingIndex::default());
    let ingestor = ingestor(Arc::clone(&index));

    ingestor
        .ingest_document(&test_document("notes.txt", "original content"))
        .await
        .expect("ingest ok");
    assert_eq!(index.entries().len(), 1);

    let stats = ingestor
        .ingest_document(&test_document("notes.txt", ""))
        .await
        .expect("ingest ok");

    assert_eq!(stats.chunks_created, 0);
    assert!(index.entries().is_empty());
}

#[tokio::test]
async fn dimension_mismatch_is_schema_conflict() {
    let result = Ingestor::new(
        Box::new(FixedEmbedder { dimension: 768 }),
        Box::new(RecordingIndex::default()),
        ChunkerConfig::default(),
    );

    assert!(matches!(result, Err(RagError::SchemaConflict(_))));
}

#[tokio::test]
async fn directory_run_isolates_failures() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("good.md"), "# Title\n\nSome content.")
        .expect("write ok");
    std::fs::write(temp_dir.path().join("broken.txt"), [0xff, 0xfe, 0xfd])
        .expect("write ok");
    std::fs::write(temp_dir.path().join("ignored.pdf"), "not supported").expect("write ok");

    let index = Arc::new(RecordingIndex::default());
    let ingestor = ingestor(Arc::clone(&index));

    let stats = ingestor
        .ingest_directory(temp_dir.path())
        .await
        .expect("ingest ok");

    assert_eq!(stats.documents_processed, 1);
    assert_eq!(stats.failures, 1);
    assert!(index.entries().iter().all(|e| e.metadata.source_id == "good.md"));
}

#[tokio::test]
async fn missing_directory_is_rejected() {
    let ingestor = ingestor(Arc::new(RecordingIndex::default()));

    let result = ingestor.ingest_directory(Path::new("/no/such/dir")).await;
    assert!(matches!(result, Err(RagError::InvalidConfiguration(_))));
}
