//! Cross-encoder reranking.
//!
//! A [`Reranker`] scores `(query, document)` pairs. The model is heavy, so
//! [`LazyReranker`] loads it on the first query that needs it and keeps it
//! for the rest of the process. A failed load is logged and not remembered:
//! the query proceeds without reranking and the next query tries again.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::config::RerankerConfig;
use crate::error::CorpusError;

/// Relevance of the candidate at `index` in the input slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankScore {
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score every document against `query`. Results may come in any order.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>>;
}

type LoadFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn Reranker>>> + Send>>;
type Loader = Box<dyn Fn() -> LoadFuture + Send + Sync>;

/// A reranker constructed on first use.
pub struct LazyReranker {
    loader: Option<Loader>,
    cell: OnceCell<Arc<dyn Reranker>>,
}

impl LazyReranker {
    pub fn from_config(config: &RerankerConfig) -> Self {
        match config.provider.as_str() {
            "local" => {
                let model = config.model.clone();
                Self::from_loader(move || {
                    let model = model.clone();
                    Box::pin(async move { load_local(model).await })
                })
            }
            _ => Self::disabled(),
        }
    }

    /// Never reranks.
    pub fn disabled() -> Self {
        Self {
            loader: None,
            cell: OnceCell::new(),
        }
    }

    /// Already loaded with `reranker`.
    pub fn with_reranker(reranker: Arc<dyn Reranker>) -> Self {
        Self {
            loader: None,
            cell: OnceCell::new_with(Some(reranker)),
        }
    }

    fn from_loader<F>(loader: F) -> Self
    where
        F: Fn() -> LoadFuture + Send + Sync + 'static,
    {
        Self {
            loader: Some(Box::new(loader)),
            cell: OnceCell::new(),
        }
    }

    /// The loaded reranker, loading it now if needed. `None` when disabled
    /// or when loading fails.
    pub async fn get(&self) -> Option<Arc<dyn Reranker>> {
        if let Some(reranker) = self.cell.get() {
            return Some(Arc::clone(reranker));
        }
        let loader = self.loader.as_ref()?;
        match self.cell.get_or_try_init(|| loader()).await {
            Ok(reranker) => Some(Arc::clone(reranker)),
            Err(e) => {
                let err = CorpusError::RerankerLoad(e.to_string());
                warn!(error = %err, "skipping rerank");
                None
            }
        }
    }
}

#[cfg(feature = "local-models")]
async fn load_local(model: String) -> Result<Arc<dyn Reranker>> {
    let reranker = tokio::task::spawn_blocking(move || LocalReranker::load(&model)).await??;
    Ok(Arc::new(reranker))
}

#[cfg(not(feature = "local-models"))]
async fn load_local(_model: String) -> Result<Arc<dyn Reranker>> {
    bail!("Local reranker requires --features local-models")
}

// ============ Local (fastembed) ============

/// BGE/Jina cross-encoders run in-process via fastembed.
#[cfg(feature = "local-models")]
pub struct LocalReranker {
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-models")]
impl LocalReranker {
    /// Blocking: may download the model on first use.
    pub fn load(name: &str) -> Result<Self> {
        let kind = fastembed_reranker(name)?;
        info!(model = name, "loading reranker");
        let model = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(kind).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize reranker '{}': {}", name, e))?;
        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

fn fastembed_reranker_name(name: &str) -> Result<&'static str> {
    match name {
        "bge-reranker-base" => Ok("bge-reranker-base"),
        "bge-reranker-v2-m3" => Ok("bge-reranker-v2-m3"),
        "jina-reranker-v1-turbo-en" => Ok("jina-reranker-v1-turbo-en"),
        "jina-reranker-v2-base-multilingual" => Ok("jina-reranker-v2-base-multilingual"),
        other => bail!(
            "Unknown reranker model: '{}'. Supported models: bge-reranker-base, \
             bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
            other
        ),
    }
}

#[cfg(feature = "local-models")]
fn fastembed_reranker(name: &str) -> Result<fastembed::RerankerModel> {
    use fastembed::RerankerModel;
    Ok(match fastembed_reranker_name(name)? {
        "bge-reranker-base" => RerankerModel::BGERerankerBase,
        "jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
        "jina-reranker-v2-base-multilingual" => RerankerModel::JINARerankerV2BaseMultiligual,
        _ => RerankerModel::BGERerankerV2M3,
    })
}

#[cfg(feature = "local-models")]
#[async_trait]
impl Reranker for LocalReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<RerankScore>> {
        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents = documents.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| anyhow::anyhow!("reranker lock poisoned"))?;
            let results = guard
                .rerank(query, documents, false, None)
                .map_err(|e| anyhow::anyhow!("Rerank failed: {}", e))?;
            Ok(results
                .into_iter()
                .map(|r| RerankScore {
                    index: r.index,
                    score: r.score,
                })
                .collect())
        })
        .await?
    }
}
