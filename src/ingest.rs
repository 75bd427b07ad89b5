//! Ingestion pipeline.
//!
//! Each file runs to completion or failure before the next one starts:
//! placeholder → convert → metadata → chunk → purge → embed/upsert →
//! completed. Any failure after the placeholder marks the record `failed`
//! with the message and is reported in the file's [`IngestOutcome`]; a
//! batch carries on with the remaining files. Partial vector writes are not
//! rolled back; re-ingesting the same filename purges them first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chunk::chunk_blocks;
use crate::corpus::Corpus;
use crate::error::CorpusError;
use crate::metadata::extract_metadata;
use crate::models::{ExtractedMetadata, TextBlock};

/// Characters of converted text handed to metadata extraction.
pub const PREVIEW_CHARS: usize = 5000;

/// Result of ingesting one file.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub filename: String,
    pub success: bool,
    pub message: String,
    /// Converted block count on success.
    pub page_count: usize,
}

impl IngestOutcome {
    fn failed(filename: &str, message: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            success: false,
            message: message.into(),
            page_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<IngestOutcome>,
}

impl BatchSummary {
    fn push(&mut self, outcome: IngestOutcome) {
        if outcome.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

fn filename_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

/// First `limit` characters of the blocks joined by newlines.
fn preview(blocks: &[TextBlock], limit: usize) -> String {
    let joined = blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    joined.chars().take(limit).collect()
}

impl Corpus {
    /// Ingest the file at `path`, keyed by its file name.
    pub async fn ingest_file(&self, path: &Path) -> IngestOutcome {
        let Some(filename) = filename_of(path) else {
            return IngestOutcome::failed(
                &path.display().to_string(),
                "path has no usable file name",
            );
        };

        if let Err(e) = self
            .store
            .upsert_placeholder(&filename, &path.display().to_string())
            .await
        {
            error!(filename = %filename, error = %e, "could not register document");
            return IngestOutcome::failed(&filename, e.to_string());
        }
        info!(filename = %filename, "ingesting");

        let (blocks, metadata) = match self.process(&filename, path).await {
            Ok(done) => done,
            Err(e) => {
                warn!(filename = %filename, error = %e, "ingestion failed");
                if let Err(mark) = self.store.mark_failed(&filename, &e.to_string()).await {
                    error!(filename = %filename, error = %mark, "could not record failure");
                }
                return IngestOutcome::failed(&filename, e.to_string());
            }
        };

        if let Err(e) = self
            .store
            .mark_completed(&filename, &metadata, blocks)
            .await
        {
            error!(filename = %filename, error = %e, "could not mark document completed");
            if let Err(mark) = self.store.mark_failed(&filename, &e.to_string()).await {
                error!(filename = %filename, error = %mark, "could not record failure");
            }
            return IngestOutcome::failed(&filename, e.to_string());
        }

        info!(filename = %filename, pages = blocks, doc_type = %metadata.doc_type, "ingested");
        IngestOutcome {
            filename,
            success: true,
            message: "ingested".to_string(),
            page_count: blocks,
        }
    }

    /// Steps 2-6. Returns the block count and the metadata to commit.
    async fn process(
        &self,
        filename: &str,
        path: &Path,
    ) -> Result<(usize, ExtractedMetadata), CorpusError> {
        let converter = Arc::clone(&self.converter);
        let owned = path.to_path_buf();
        let blocks = tokio::task::spawn_blocking(move || converter.convert(&owned))
            .await
            .map_err(|e| CorpusError::Parse(format!("converter aborted: {}", panic_message(e))))?
            .map_err(|e| CorpusError::Parse(e.to_string()))?;
        if blocks.is_empty() {
            return Err(CorpusError::Parse("empty parse".into()));
        }

        let metadata =
            extract_metadata(self.llm.as_ref(), &preview(&blocks, PREVIEW_CHARS), filename).await;

        let chunks = chunk_blocks(filename, &blocks, &metadata, self.max_tokens);
        if chunks.is_empty() {
            return Err(CorpusError::Parse("empty parse".into()));
        }

        self.index.delete_by_filename(filename).await?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| CorpusError::Embedding(e.to_string()))?;
        if vectors.len() != chunks.len() {
            return Err(CorpusError::Embedding(format!(
                "expected {} vectors, got {}",
                chunks.len(),
                vectors.len()
            )));
        }
        self.index
            .upsert(&chunks, &vectors, self.embedder.model_name())
            .await?;

        Ok((blocks.len(), metadata))
    }

    /// Ingest `paths` one after another.
    pub async fn ingest_batch(&self, paths: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (i, path) in paths.iter().enumerate() {
            info!(current = i + 1, total = paths.len(), path = %path.display(), "batch progress");
            summary.push(self.ingest_file(path).await);
        }
        summary
    }

    /// Copy each file into the upload directory, replacing any file of the
    /// same name, and ingest the copy.
    pub async fn upload_and_ingest(&self, sources: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for source in sources {
            let outcome = match self.store_upload(source) {
                Ok(dest) => self.ingest_file(&dest).await,
                Err(e) => {
                    warn!(path = %source.display(), error = %e, "upload failed");
                    let name = filename_of(source).unwrap_or_else(|| source.display().to_string());
                    IngestOutcome::failed(&name, e.to_string())
                }
            };
            summary.push(outcome);
        }
        summary
    }

    fn store_upload(&self, source: &Path) -> Result<PathBuf, CorpusError> {
        let filename = filename_of(source).ok_or_else(|| {
            CorpusError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", source.display()),
            ))
        })?;
        std::fs::create_dir_all(&self.upload_dir)?;
        let dest = self.upload_dir.join(&filename);
        let same_file = matches!(
            (source.canonicalize(), dest.canonicalize()),
            (Ok(a), Ok(b)) if a == b
        );
        if !same_file {
            std::fs::copy(source, &dest)?;
        }
        Ok(dest)
    }

    /// Remove `filename` from the corpus: its vector entries, its record and
    /// its uploaded file. Returns whether a record existed.
    pub async fn remove(&self, filename: &str) -> Result<bool, CorpusError> {
        let purged = self.index.delete_by_filename(filename).await?;
        let existed = self.store.delete(filename).await?;

        let path = self.upload_dir.join(filename);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not delete uploaded file");
            }
        }

        info!(filename = %filename, purged, existed, "removed from corpus");
        Ok(existed)
    }
}

/// Filename → path for every file in `dir`, for grounding lookups.
pub fn upload_path_map(dir: &Path) -> HashMap<String, PathBuf> {
    let mut map = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return map;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = filename_of(&path) {
            map.insert(name, path);
        }
    }
    map
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}
