#[cfg(test)]
mod tests;

use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use tracing::{debug, info};

use super::{EntryMetadata, IndexEntry, ScoredChunk, VectorIndex, next_seq, rank_results};
use crate::config::Config;
use crate::{RagError, Result};

/// Embedded vector index backed by a local LanceDB directory.
pub struct LanceIndex {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

impl LanceIndex {
    /// Connect to the on-disk database and open or create the chunks table.
    /// An existing table created with a different vector dimension is
    /// rejected rather than silently recreated.
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let db_path = config.vector_db_path();
        debug!("Opening LanceDB at path: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RagError::IndexUnavailable(format!("cannot create index directory: {}", e))
            })?;
        }

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot connect to LanceDB: {}", e)))?;

        let index = Self {
            connection,
            table_name: config.index.collection.clone(),
            dimension: config.embedding.dimension,
        };

        if index.table_exists().await? {
            let existing = index.detect_existing_dimension().await?;
            if existing != index.dimension {
                return Err(RagError::SchemaConflict(format!(
                    "index '{}' stores {}-dimension vectors, configuration says {}",
                    index.table_name, existing, index.dimension
                )));
            }
        } else {
            index.create_table().await?;
            info!(
                "Created table '{}' with {} dimensions",
                index.table_name, index.dimension
            );
        }

        Ok(index)
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot list tables: {}", e)))?;
        Ok(names.contains(&self.table_name))
    }

    async fn create_table(&self) -> Result<()> {
        self.connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot create table: {}", e)))?;
        Ok(())
    }

    async fn detect_existing_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot read table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return Ok(*size as usize);
                }
            }
        }

        Err(RagError::SchemaConflict(format!(
            "table '{}' has no usable vector column",
            self.table_name
        )))
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot open table: {}", e)))
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("token_count", DataType::UInt32, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
            Field::new("seq", DataType::UInt64, false),
        ]))
    }

    fn create_record_batch(&self, entries: &[IndexEntry]) -> Result<RecordBatch> {
        let len = entries.len();

        let mut ids = Vec::with_capacity(len);
        let mut source_ids = Vec::with_capacity(len);
        let mut titles = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);
        let mut seqs = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for entry in entries {
            if entry.vector.len() != self.dimension {
                return Err(RagError::SchemaConflict(format!(
                    "entry '{}' has a {}-dimension vector, index expects {}",
                    entry.id,
                    entry.vector.len(),
                    self.dimension
                )));
            }
            ids.push(entry.id.as_str());
            source_ids.push(entry.metadata.source_id.as_str());
            titles.push(entry.metadata.title.as_str());
            contents.push(entry.metadata.content.as_str());
            token_counts.push(entry.metadata.token_count);
            chunk_indices.push(entry.metadata.chunk_index);
            created_ats.push(entry.metadata.created_at.as_str());
            seqs.push(next_seq());
            flat_values.extend_from_slice(&entry.vector);
        }

        let values_array = Float32Array::from(flat_values);
        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            self.dimension as i32,
            Arc::new(values_array),
            None,
        )
        .map_err(|e| RagError::IndexUnavailable(format!("cannot build vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(source_ids)),
            Arc::new(StringArray::from(titles)),
            Arc::new(StringArray::from(contents)),
            Arc::new(UInt32Array::from(token_counts)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(created_ats)),
            Arc::new(UInt64Array::from(seqs)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| RagError::IndexUnavailable(format!("cannot build record batch: {}", e)))
    }

    fn parse_result_batch(&self, batch: &RecordBatch) -> Result<Vec<(ScoredChunk, u64)>> {
        let num_rows = batch.num_rows();
        let mut results = Vec::with_capacity(num_rows);

        let source_ids = string_column(batch, "source_id")?;
        let titles = string_column(batch, "title")?;
        let contents = string_column(batch, "content")?;
        let token_counts = u32_column(batch, "token_count")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let created_ats = string_column(batch, "created_at")?;

        let seqs = batch
            .column_by_name("seq")
            .ok_or_else(|| RagError::IndexUnavailable("missing seq column".to_string()))?
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| RagError::IndexUnavailable("invalid seq column type".to_string()))?;

        let distances = batch
            .column_by_name("_distance")
            .map(|col| col.as_any().downcast_ref::<Float32Array>());

        for row in 0..num_rows {
            let metadata = EntryMetadata {
                source_id: source_ids.value(row).to_string(),
                title: titles.value(row).to_string(),
                content: contents.value(row).to_string(),
                token_count: token_counts.value(row),
                chunk_index: chunk_indices.value(row),
                created_at: created_ats.value(row).to_string(),
            };

            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Cosine distance is 1 - cos, so this lands in [0, 1] with 1 for
            // identical direction. Matches the Qdrant adapter's scale.
            let score = (1.0 - distance / 2.0).clamp(0.0, 1.0);

            results.push((ScoredChunk { metadata, score }, seqs.value(row)));
        }

        Ok(results)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
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

        let record_batch = self.create_record_batch(&entries)?;
        let table = self.open_table().await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot insert entries: {}", e)))?;

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

        let table = self.open_table().await?;
        let mut stream = table
            .vector_search(vector)
            .map_err(|e| RagError::IndexUnavailable(format!("cannot build search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot execute search: {}", e)))?;

        let mut results = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot read result stream: {}", e)))?
        {
            results.extend(self.parse_result_batch(&batch)?);
        }

        rank_results(&mut results);
        results.truncate(k);
        Ok(results.into_iter().map(|(chunk, _)| chunk).collect())
    }

    #[inline]
    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        debug!("Deleting entries for source: {}", source_id);

        let table = self.open_table().await?;
        let predicate = format!("source_id = '{}'", source_id.replace('\'', "''"));
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot delete entries: {}", e)))?;

        Ok(())
    }

    #[inline]
    async fn clear(&self) -> Result<()> {
        info!("Clearing table '{}'", self.table_name);

        if self.table_exists().await? {
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::IndexUnavailable(format!("cannot drop table: {}", e)))?;
        }
        self.create_table().await
    }

    #[inline]
    async fn count(&self) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::IndexUnavailable(format!("cannot count rows: {}", e)))?;
        Ok(count as u64)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexUnavailable(format!("missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::IndexUnavailable(format!("invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexUnavailable(format!("missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| RagError::IndexUnavailable(format!("invalid {} column type", name)))
}
