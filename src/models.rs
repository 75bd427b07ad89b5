//! Core data models.
//!
//! These types represent the document records, text blocks, chunks and
//! grounding images that flow through ingestion and retrieval.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of a document record.
///
/// Transitions only go `Processing -> Completed` or `Processing -> Failed`.
/// Re-uploading a file starts a fresh `Processing` generation; that is a
/// reset of the record, not a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Processing, DocumentStatus::Completed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// One row of the corpus table, keyed by `filename`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub upload_time: DateTime<Utc>,
    pub doc_type: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub page_count: Option<i64>,
    pub status: DocumentStatus,
    pub error_msg: Option<String>,
}

/// A converted span of source text with the page it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
    /// 1-based page label as the converter reports it ("1", "2", ...).
    pub page_label: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, page_label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_label: page_label.into(),
        }
    }
}

/// Structured metadata extracted from a document preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub doc_type: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub doc_date: Option<NaiveDate>,
}

impl ExtractedMetadata {
    /// The value used whenever extraction fails.
    pub fn fallback() -> Self {
        Self {
            doc_type: "General".to_string(),
            summary: "extraction failed".to_string(),
            keywords: Vec::new(),
            doc_date: None,
        }
    }

    /// Keywords as stored in the `tags` column.
    pub fn joined_tags(&self) -> String {
        self.keywords.join(", ")
    }
}

/// A retrievable unit of document text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub filename: String,
    pub page_label: String,
    pub text: String,
    pub metadata: ExtractedMetadata,
}

/// A chunk returned by retrieval with its relevance score.
///
/// The score is cosine similarity after stage 1 and the cross-encoder score
/// after reranking.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A source page addressed for rasterization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub filename: String,
    /// 0-based page index.
    pub page_index: usize,
}

/// A rasterized source page sent alongside the text context.
#[derive(Debug, Clone)]
pub struct GroundingImage {
    pub page: PageRef,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_processing_moves_forward() {
        use DocumentStatus::*;
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("done".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn fallback_metadata_is_fixed() {
        let meta = ExtractedMetadata::fallback();
        assert_eq!(meta.doc_type, "General");
        assert_eq!(meta.summary, "extraction failed");
        assert!(meta.keywords.is_empty());
        assert!(meta.doc_date.is_none());
    }

    #[test]
    fn metadata_serializes_iso_date() {
        let meta = ExtractedMetadata {
            doc_type: "Contract".into(),
            summary: "Service agreement".into(),
            keywords: vec!["A".into(), "B".into()],
            doc_date: NaiveDate::from_ymd_opt(2025, 1, 1),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["doc_date"], "2025-01-01");
        assert_eq!(meta.joined_tags(), "A, B");
    }
}
