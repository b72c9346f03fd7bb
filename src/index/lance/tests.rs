use super::*;
use crate::config::EmbeddingConfig;
use tempfile::TempDir;

fn test_config(dimension: usize) -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        embedding: EmbeddingConfig {
            dimension,
            ..EmbeddingConfig::default()
        },
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    (config, temp_dir)
}

fn test_entry(id: &str, source_id: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
        id: id.to_string(),
        vector,
        metadata: EntryMetadata {
            source_id: source_id.to_string(),
            title: "Test Document".to_string(),
            content: format!("content for entry {}", id),
            token_count: 25,
            chunk_index: 0,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        },
    }
}

#[tokio::test]
async fn open_creates_table() {
    let (config, _temp_dir) = test_config(4);

    let index = LanceIndex::open(&config).await.expect("should open index");
    assert_eq!(index.dimension(), 4);
    assert_eq!(index.count().await.expect("count ok"), 0);
}

#[tokio::test]
async fn reopen_with_different_dimension_is_schema_conflict() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.embedding.dimension = 768;
    LanceIndex::open(&config).await.expect("should open index");

    config.embedding.dimension = 384;
    let result = LanceIndex::open(&config).await;
    assert!(matches!(result, Err(RagError::SchemaConflict(_))));
}

#[tokio::test]
async fn upsert_and_count() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    let entries = vec![
        test_entry("a", "doc-1", vec![1.0, 0.0, 0.0, 0.0]),
        test_entry("b", "doc-1", vec![0.0, 1.0, 0.0, 0.0]),
        test_entry("c", "doc-2", vec![0.0, 0.0, 1.0, 0.0]),
    ];
    index.upsert(entries).await.expect("upsert ok");

    assert_eq!(index.count().await.expect("count ok"), 3);
}

#[tokio::test]
async fn upsert_rejects_wrong_dimension() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    let result = index
        .upsert(vec![test_entry("a", "doc-1", vec![1.0, 0.0])])
        .await;
    assert!(matches!(result, Err(RagError::SchemaConflict(_))));
    assert_eq!(index.count().await.expect("count ok"), 0);
}

#[tokio::test]
async fn query_ranks_by_similarity() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    index
        .upsert(vec![
            test_entry("exact", "doc-1", vec![1.0, 0.0, 0.0, 0.0]),
            test_entry("close", "doc-1", vec![0.9, 0.1, 0.0, 0.0]),
            test_entry("orthogonal", "doc-2", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .expect("upsert ok");

    let results = index
        .query(&[1.0, 0.0, 0.0, 0.0], 3)
        .await
        .expect("query ok");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].metadata.content, "content for entry exact");
    assert_eq!(results[1].metadata.content, "content for entry close");
    // Scores are normalized and ordered best first
    assert!(results[0].score > 0.99);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for result in &results {
        assert!((0.0..=1.0).contains(&result.score));
    }
}

#[tokio::test]
async fn query_limits_results() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    let entries = (0..10)
        .map(|i| {
            test_entry(
                &format!("e{}", i),
                "doc-1",
                vec![1.0, i as f32 * 0.01, 0.0, 0.0],
            )
        })
        .collect();
    index.upsert(entries).await.expect("upsert ok");

    let results = index
        .query(&[1.0, 0.0, 0.0, 0.0], 3)
        .await
        .expect("query ok");
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn query_on_empty_index_returns_nothing() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    let results = index
        .query(&[1.0, 0.0, 0.0, 0.0], 5)
        .await
        .expect("query ok");
    assert!(results.is_empty());
}

#[tokio::test]
async fn delete_by_source_removes_only_that_source() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    index
        .upsert(vec![
            test_entry("a", "doc-1", vec![1.0, 0.0, 0.0, 0.0]),
            test_entry("b", "doc-1", vec![0.0, 1.0, 0.0, 0.0]),
            test_entry("c", "doc-2", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .expect("upsert ok");

    index.delete_by_source("doc-1").await.expect("delete ok");

    assert_eq!(index.count().await.expect("count ok"), 1);
    let results = index
        .query(&[0.0, 0.0, 1.0, 0.0], 10)
        .await
        .expect("query ok");
    assert!(results.iter().all(|r| r.metadata.source_id == "doc-2"));
}

#[tokio::test]
async fn delete_missing_source_is_noop() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    index
        .upsert(vec![test_entry("a", "doc-1", vec![1.0, 0.0, 0.0, 0.0])])
        .await
        .expect("upsert ok");

    index.delete_by_source("no-such-doc").await.expect("delete ok");
    assert_eq!(index.count().await.expect("count ok"), 1);
}

#[tokio::test]
async fn clear_empties_the_index() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    index
        .upsert(vec![
            test_entry("a", "doc-1", vec![1.0, 0.0, 0.0, 0.0]),
            test_entry("b", "doc-2", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .expect("upsert ok");

    index.clear().await.expect("clear ok");

    assert_eq!(index.count().await.expect("count ok"), 0);
    let results = index
        .query(&[1.0, 0.0, 0.0, 0.0], 5)
        .await
        .expect("query ok");
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_upsert_is_noop() {
    let (config, _temp_dir) = test_config(4);
    let index = LanceIndex::open(&config).await.expect("should open index");

    index.upsert(vec![]).await.expect("upsert ok");
    assert_eq!(index.count().await.expect("count ok"), 0);
}
