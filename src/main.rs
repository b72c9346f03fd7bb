use std::path::PathBuf;

use askdocs::Result;
use askdocs::commands::{ask, clear, ingest, init_config, show_config, show_status};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "askdocs")]
#[command(about = "Index local documents and answer questions about them with citations")]
#[command(version)]
struct Cli {
    /// Directory holding the configuration and the embedded index
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a document file or a directory of documents
    Ingest {
        /// Path to a .txt/.md file or a directory containing them
        path: PathBuf,
    },
    /// Ask a question about the indexed documents
    Ask {
        /// The question to answer
        question: String,
        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show index size and backend health
    Status,
    /// Delete everything from the vector index
    Clear,
    /// Manage the configuration file
    Config {
        /// Show the active configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { path } => {
            ingest(&path, cli.base_dir).await?;
        }
        Commands::Ask { question, top_k } => {
            ask(&question, top_k, cli.base_dir).await?;
        }
        Commands::Status => {
            show_status(cli.base_dir).await?;
        }
        Commands::Clear => {
            clear(cli.base_dir).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(cli.base_dir)?;
            } else {
                init_config(cli.base_dir)?;
            }
        }
    }

    Ok(())
}
