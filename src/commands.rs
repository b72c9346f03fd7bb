use std::path::{Path, PathBuf};

use tracing::info;

use crate::Result;
use crate::config::{Config, EmbeddingProvider, default_base_dir};
use crate::embeddings::{OllamaEmbedder, open_embedder};
use crate::generator::ClaudeGenerator;
use crate::index::open_index;
use crate::ingest::Ingestor;
use crate::pipeline::QueryPipeline;

fn load_config(base_dir: Option<PathBuf>) -> Result<Config> {
    Config::load(base_dir.unwrap_or_else(default_base_dir))
}

/// Ingest a file or a directory of documents into the vector index.
#[inline]
pub async fn ingest(path: &Path, base_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(base_dir)?;
    let embedder = open_embedder(&config)?;
    let index = open_index(&config).await?;

    let ingestor = Ingestor::new(embedder, index, config.chunking)?.with_progress(true);

    let stats = if path.is_dir() {
        ingestor.ingest_directory(path).await?
    } else {
        ingestor.ingest_path(path).await?
    };

    println!("Ingestion complete:");
    println!("  Documents indexed: {}", stats.documents_processed);
    println!("  Chunks created: {}", stats.chunks_created);
    println!("  Embeddings generated: {}", stats.embeddings_generated);
    if stats.failures > 0 {
        println!("  Documents skipped: {}", stats.failures);
    }

    Ok(())
}

/// Answer a question from the indexed documents.
#[inline]
pub async fn ask(question: &str, top_k: Option<usize>, base_dir: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(base_dir)?;
    if let Some(k) = top_k {
        config.retrieval.top_k = k;
        config.validate()?;
    }

    let embedder = open_embedder(&config)?;
    let index = open_index(&config).await?;
    let generator = Box::new(ClaudeGenerator::new(&config.generator)?);

    let pipeline = QueryPipeline::new(embedder, index, generator, config.retrieval)?;
    let answer = pipeline.answer(question).await?;

    println!("{}", answer.text);

    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &answer.citations {
            println!("  {} ({})", citation.title, citation.source_id);
        }
    }

    info!(
        "Token usage: {} in, {} out",
        answer.usage.input_tokens, answer.usage.output_tokens
    );

    Ok(())
}

/// Show index size and backend health.
#[inline]
pub async fn show_status(base_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(base_dir)?;

    println!("askdocs status");
    println!("  Base directory: {}", config.base_dir.display());
    println!("  Index backend: {:?}", config.index.backend);
    println!("  Embedding provider: {:?}", config.embedding.provider);
    println!(
        "  Embedding model: {} ({} dimensions)",
        config.embedding.model, config.embedding.dimension
    );

    match open_index(&config).await {
        Ok(index) => {
            let count = index.count().await?;
            println!("  Indexed chunks: {}", count);
        }
        Err(e) => println!("  Index: unavailable ({})", e),
    }

    if config.embedding.provider == EmbeddingProvider::Local {
        match OllamaEmbedder::new(&config.embedding).and_then(|e| e.health_check()) {
            Ok(()) => println!("  Embedding server: healthy"),
            Err(e) => println!("  Embedding server: unavailable ({})", e),
        }
    }

    Ok(())
}

/// Delete every entry from the vector index.
#[inline]
pub async fn clear(base_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(base_dir)?;
    let index = open_index(&config).await?;

    index.clear().await?;
    println!("Index cleared.");

    Ok(())
}

/// Print the active configuration as TOML.
#[inline]
pub fn show_config(base_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(base_dir)?;
    let rendered = toml::to_string_pretty(&config)
        .map_err(|e| crate::RagError::InvalidConfiguration(format!("serialize config: {}", e)))?;

    println!("# {}", config.base_dir.join("config.toml").display());
    print!("{}", rendered);

    Ok(())
}

/// Write the current configuration to disk, creating the file with defaults
/// when it does not exist yet.
#[inline]
pub fn init_config(base_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(base_dir)?;
    config.save()?;

    println!(
        "Wrote configuration to {}",
        config.base_dir.join("config.toml").display()
    );

    Ok(())
}
