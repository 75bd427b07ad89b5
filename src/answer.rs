//! Question answering over the corpus.
//!
//! Retrieval picks the chunks, grounding renders up to two of their source
//! pages, and one prompt carrying the labeled text context (plus the page
//! images, if any) goes to the generation model. The model's text comes
//! back unmodified. An empty corpus and a query with no matches both
//! short-circuit with a fixed message before generation.

use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::corpus::Corpus;
use crate::error::CorpusError;
use crate::models::ScoredChunk;
use crate::render::synthesize;
use crate::retrieve::{retrieve, Retrieval};

pub const EMPTY_CORPUS_MESSAGE: &str =
    "The corpus is empty. Upload documents before asking questions.";
pub const NO_RELEVANT_CONTENT_MESSAGE: &str = "No relevant content found in the corpus.";

/// Where a piece of the context came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub filename: String,
    pub page_label: String,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Context chunks in rank order.
    pub sources: Vec<SourceRef>,
    pub images_attached: usize,
    pub reranked: bool,
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answered(Answer),
    EmptyCorpus,
    NoRelevantContent,
    Failed(String),
}

impl QueryOutcome {
    pub fn success(&self) -> bool {
        !matches!(self, QueryOutcome::Failed(_))
    }

    /// Text to show the user.
    pub fn message(&self) -> &str {
        match self {
            QueryOutcome::Answered(answer) => &answer.text,
            QueryOutcome::EmptyCorpus => EMPTY_CORPUS_MESSAGE,
            QueryOutcome::NoRelevantContent => NO_RELEVANT_CONTENT_MESSAGE,
            QueryOutcome::Failed(message) => message,
        }
    }
}

/// Every chunk's text under a header naming its file and page.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    let mut context = String::new();
    for scored in chunks {
        let chunk = &scored.chunk;
        context.push_str(&format!(
            "--- Document: {} [page {}] ---\n{}\n\n",
            chunk.filename, chunk.page_label, chunk.text
        ));
    }
    context
}

pub fn build_prompt(question: &str, context: &str, has_images: bool) -> String {
    let mut prompt = String::from(
        "Answer the user's question using the context text below",
    );
    if has_images {
        prompt.push_str(
            " and the attached images of the original document pages.\n\
             If an image contains a table or chart, prefer the image content.",
        );
    } else {
        prompt.push('.');
    }
    prompt.push_str(&format!(
        "\n\nQuestion: {}\n\nContext:\n{}",
        question, context
    ));
    prompt
}

impl Corpus {
    /// Answer `question`. `path_map` locates source files for grounding;
    /// files missing from it are looked up in the upload directory.
    pub async fn ask(&self, question: &str, path_map: &HashMap<String, PathBuf>) -> QueryOutcome {
        match self.try_ask(question, path_map).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "query failed");
                QueryOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_ask(
        &self,
        question: &str,
        path_map: &HashMap<String, PathBuf>,
    ) -> Result<QueryOutcome, CorpusError> {
        let (chunks, reranked) = match retrieve(
            &self.index,
            self.embedder.as_ref(),
            &self.reranker,
            question,
        )
        .await?
        {
            Retrieval::EmptyCorpus => return Ok(QueryOutcome::EmptyCorpus),
            Retrieval::NoMatches => return Ok(QueryOutcome::NoRelevantContent),
            Retrieval::Ranked { chunks, reranked } => (chunks, reranked),
        };

        for scored in &chunks {
            info!(
                filename = %scored.chunk.filename,
                page = %scored.chunk.page_label,
                score = scored.score,
                "context chunk"
            );
        }

        let images = synthesize(
            self.rasterizer.as_ref(),
            &chunks,
            path_map,
            &self.upload_dir,
        )
        .await;
        let prompt = build_prompt(question, &build_context(&chunks), !images.is_empty());

        let text = self
            .llm
            .complete(&prompt, &images)
            .await
            .map_err(|e| CorpusError::Generation(e.to_string()))?;

        Ok(QueryOutcome::Answered(Answer {
            text,
            sources: chunks
                .iter()
                .map(|c| SourceRef {
                    filename: c.chunk.filename.clone(),
                    page_label: c.chunk.page_label.clone(),
                })
                .collect(),
            images_attached: images.len(),
            reranked,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ExtractedMetadata};

    fn scored(filename: &str, page: &str, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "x".into(),
                filename: filename.into(),
                page_label: page.into(),
                text: text.into(),
                metadata: ExtractedMetadata::fallback(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn context_labels_each_chunk() {
        let context = build_context(&[
            scored("contract.pdf", "1", "Service Agreement"),
            scored("memo.docx", "1", "Lunch at noon"),
        ]);
        assert_eq!(
            context,
            "--- Document: contract.pdf [page 1] ---\nService Agreement\n\n\
             --- Document: memo.docx [page 1] ---\nLunch at noon\n\n"
        );
    }

    #[test]
    fn image_instruction_only_with_images() {
        let with = build_prompt("q?", "ctx", true);
        let without = build_prompt("q?", "ctx", false);
        assert!(with.contains("prefer the image content"));
        assert!(!without.contains("image"));
        assert!(without.contains("Question: q?"));
        assert!(without.ends_with("Context:\nctx"));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(QueryOutcome::EmptyCorpus.message(), EMPTY_CORPUS_MESSAGE);
        assert!(QueryOutcome::NoRelevantContent.success());
        let failed = QueryOutcome::Failed("generation failed: quota".into());
        assert!(!failed.success());
        assert_eq!(failed.message(), "generation failed: quota");
    }
}
