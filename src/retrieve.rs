//! Two-stage retrieval.
//!
//! Stage 1 embeds the query and takes the [`CANDIDATE_K`] nearest chunks
//! from the whole corpus. Stage 2 re-scores those candidates with the
//! cross-encoder and keeps the best [`RERANK_TOP_N`]. When no reranker is
//! available, stage 1's candidates are returned as they are.

use tracing::{debug, info, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::CorpusError;
use crate::index::VectorIndex;
use crate::models::ScoredChunk;
use crate::rerank::{LazyReranker, RerankScore};

/// Stage-1 nearest-neighbour count.
pub const CANDIDATE_K: usize = 20;
/// Chunks kept after reranking.
pub const RERANK_TOP_N: usize = 5;

#[derive(Debug)]
pub enum Retrieval {
    /// The index has no collection yet.
    EmptyCorpus,
    /// The corpus exists but stage 1 found nothing.
    NoMatches,
    Ranked {
        chunks: Vec<ScoredChunk>,
        /// Whether stage 2 ran.
        reranked: bool,
    },
}

pub async fn retrieve(
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    reranker: &LazyReranker,
    query: &str,
) -> Result<Retrieval, CorpusError> {
    if !index.collection_exists().await? {
        info!("retrieval on empty corpus");
        return Ok(Retrieval::EmptyCorpus);
    }

    let query_vec = embed_query(embedder, query)
        .await
        .map_err(|e| CorpusError::Embedding(e.to_string()))?;
    let candidates = index.search(&query_vec, CANDIDATE_K).await?;
    if candidates.is_empty() {
        return Ok(Retrieval::NoMatches);
    }
    debug!(candidates = candidates.len(), "stage 1 complete");

    let Some(model) = reranker.get().await else {
        return Ok(Retrieval::Ranked {
            chunks: candidates,
            reranked: false,
        });
    };

    let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    match model.rerank(query, &texts).await {
        Ok(scores) => {
            let chunks = apply_rerank(candidates, scores, RERANK_TOP_N);
            debug!(kept = chunks.len(), "stage 2 complete");
            Ok(Retrieval::Ranked {
                chunks,
                reranked: true,
            })
        }
        Err(e) => {
            warn!(error = %e, "rerank failed, using stage 1 order");
            Ok(Retrieval::Ranked {
                chunks: candidates,
                reranked: false,
            })
        }
    }
}

/// Reorder `candidates` by reranker `scores`, keeping at most `top_n`.
///
/// Scores pointing outside `candidates` are ignored and each candidate is
/// used at most once, so the result is always a subset of the input.
pub fn apply_rerank(
    candidates: Vec<ScoredChunk>,
    mut scores: Vec<RerankScore>,
    top_n: usize,
) -> Vec<ScoredChunk> {
    scores.retain(|s| s.index < candidates.len());
    scores.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut slots: Vec<Option<ScoredChunk>> = candidates.into_iter().map(Some).collect();
    scores
        .into_iter()
        .filter_map(|s| {
            slots[s.index].take().map(|mut c| {
                c.score = s.score;
                c
            })
        })
        .take(top_n)
        .collect()
}
