//! # pagelens CLI
//!
//! ## Usage
//!
//! ```bash
//! pagelens --config ./config/pagelens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pagelens init` | Create the document database and vector index |
//! | `pagelens ingest <paths...>` | Copy files into the upload directory and ingest them |
//! | `pagelens list` | List document records, newest first |
//! | `pagelens delete <filename>` | Remove a document, its vectors and its uploaded file |
//! | `pagelens ask "<question>"` | Answer a question from the corpus |
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pagelens::config;
use pagelens::index::VectorIndex;
use pagelens::ingest::upload_path_map;
use pagelens::store::DocumentStore;
use pagelens::{Corpus, QueryOutcome};

/// pagelens — document question answering with page-image grounding.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pagelens.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pagelens",
    about = "pagelens — document question answering with page-image grounding",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pagelens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the document database and vector index.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Upload and ingest one or more files.
    ///
    /// Each file is copied into the upload directory (replacing a file of
    /// the same name) and ingested in order. A file that fails does not
    /// stop the rest.
    Ingest {
        /// Files to ingest (PDF, DOCX, PPTX, XLSX, Markdown, text).
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List document records.
    List,

    /// Delete a document from the corpus.
    Delete {
        /// File name as shown by `list`.
        filename: String,
    },

    /// Ask a question.
    Ask {
        /// The question text.
        question: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            DocumentStore::open(&cfg.db.path).await?;
            VectorIndex::open(&cfg.index.path, &cfg.index.collection).await?;
            std::fs::create_dir_all(&cfg.uploads.dir)?;
            println!("Corpus initialized successfully.");
        }
        Commands::Ingest { paths } => {
            let corpus = Corpus::open(&cfg).await?;
            let summary = corpus.upload_and_ingest(&paths).await;
            for outcome in &summary.outcomes {
                if outcome.success {
                    println!("  ok     {} ({} pages)", outcome.filename, outcome.page_count);
                } else {
                    println!("  failed {}: {}", outcome.filename, outcome.message);
                }
            }
            println!(
                "ingested {} of {} files",
                summary.succeeded,
                summary.outcomes.len()
            );
        }
        Commands::List => {
            let store = DocumentStore::open(&cfg.db.path).await?;
            let records = store.list_all().await?;
            if records.is_empty() {
                println!("No documents.");
            }
            for record in records {
                println!(
                    "{:<4} {:<32} {:<10} {:<16} {:>5}  {}",
                    record.id,
                    record.filename,
                    record.status,
                    record.doc_type.as_deref().unwrap_or("-"),
                    record
                        .page_count
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record.upload_time.format("%Y-%m-%d %H:%M:%S"),
                );
                if let Some(summary) = &record.summary {
                    println!("     summary: {}", summary);
                }
                if !record.tags.is_empty() {
                    println!("     tags: {}", record.tags.join(", "));
                }
                if let Some(error) = &record.error_msg {
                    println!("     error: {}", error);
                }
            }
        }
        Commands::Delete { filename } => {
            let corpus = Corpus::open(&cfg).await?;
            if corpus.remove(&filename).await? {
                println!("Deleted {}.", filename);
            } else {
                println!("No document named {}.", filename);
            }
        }
        Commands::Ask { question } => {
            let corpus = Corpus::open(&cfg).await?;
            let path_map = upload_path_map(corpus.upload_dir());
            let outcome = corpus.ask(&question, &path_map).await;
            match &outcome {
                QueryOutcome::Failed(message) => bail!("{}", message),
                QueryOutcome::Answered(answer) => {
                    println!("{}", answer.text);
                    if !answer.sources.is_empty() {
                        println!();
                        println!("Sources:");
                        for source in &answer.sources {
                            println!("  {} [page {}]", source.filename, source.page_label);
                        }
                    }
                }
                other => println!("{}", other.message()),
            }
        }
    }

    Ok(())
}
