//! The in-process owner of a corpus.
//!
//! [`Corpus`] wires the document store, the shared vector index and the
//! model seams together. Ingestion lives in [`crate::ingest`] and question
//! answering in [`crate::answer`]; both are methods on this type.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::extract::{DocumentConverter, FileConverter};
use crate::index::{self, VectorIndex};
use crate::llm::{create_model, GenerationModel};
use crate::render::{PageRasterizer, PopplerRasterizer};
use crate::rerank::LazyReranker;
use crate::store::DocumentStore;

pub struct Corpus {
    pub(crate) store: DocumentStore,
    pub(crate) index: Arc<VectorIndex>,
    pub(crate) embedder: Box<dyn EmbeddingProvider>,
    pub(crate) llm: Box<dyn GenerationModel>,
    pub(crate) converter: Arc<dyn DocumentConverter>,
    pub(crate) rasterizer: Box<dyn PageRasterizer>,
    pub(crate) reranker: LazyReranker,
    pub(crate) upload_dir: PathBuf,
    pub(crate) max_tokens: usize,
}

/// Explicit components for [`Corpus::from_parts`].
pub struct CorpusParts {
    pub store: DocumentStore,
    pub index: Arc<VectorIndex>,
    pub embedder: Box<dyn EmbeddingProvider>,
    pub llm: Box<dyn GenerationModel>,
    pub converter: Arc<dyn DocumentConverter>,
    pub rasterizer: Box<dyn PageRasterizer>,
    pub reranker: LazyReranker,
    pub upload_dir: PathBuf,
    pub max_tokens: usize,
}

impl Corpus {
    /// Build the corpus described by `config`, using the process-wide
    /// vector index handle.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = DocumentStore::open(&config.db.path)
            .await
            .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
        let index = index::shared(&config.index.path, &config.index.collection)
            .await
            .with_context(|| {
                format!("Failed to open vector index: {}", config.index.path.display())
            })?;
        std::fs::create_dir_all(&config.uploads.dir).with_context(|| {
            format!(
                "Failed to create upload directory: {}",
                config.uploads.dir.display()
            )
        })?;

        Ok(Self::from_parts(CorpusParts {
            store,
            index,
            embedder: create_provider(&config.embedding)?,
            llm: create_model(&config.llm)?,
            converter: Arc::new(FileConverter),
            rasterizer: Box::new(PopplerRasterizer::new(&config.grounding)),
            reranker: LazyReranker::from_config(&config.reranker),
            upload_dir: config.uploads.dir.clone(),
            max_tokens: config.chunking.max_tokens,
        }))
    }

    pub fn from_parts(parts: CorpusParts) -> Self {
        Self {
            store: parts.store,
            index: parts.index,
            embedder: parts.embedder,
            llm: parts.llm,
            converter: parts.converter,
            rasterizer: parts.rasterizer,
            reranker: parts.reranker,
            upload_dir: parts.upload_dir,
            max_tokens: parts.max_tokens,
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}
