//! LLM-backed metadata extraction.
//!
//! The model is asked for strict JSON with four fields. Whatever it returns
//! is validated into an [`ExtractedMetadata`]; any failure yields
//! [`ExtractedMetadata::fallback`] so ingestion carries on with defaults.
//! There is no retry.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::error::CorpusError;
use crate::llm::GenerationModel;
use crate::models::ExtractedMetadata;

/// Characters of preview text sent to the model.
pub const PREVIEW_LIMIT: usize = 3000;
/// Upper bound on keywords kept from the model's answer.
pub const MAX_KEYWORDS: usize = 5;

/// Shape of the model's JSON before validation.
#[derive(Debug, Deserialize)]
struct RawMetadata {
    doc_type: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    keywords: Option<Vec<String>>,
    #[serde(default)]
    doc_date: Option<String>,
}

/// Extract metadata from `preview`, falling back to defaults on any error.
pub async fn extract_metadata(
    model: &dyn GenerationModel,
    preview: &str,
    filename: &str,
) -> ExtractedMetadata {
    match try_extract(model, preview, filename).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!(filename, error = %e, "metadata extraction failed, using defaults");
            ExtractedMetadata::fallback()
        }
    }
}

async fn try_extract(
    model: &dyn GenerationModel,
    preview: &str,
    filename: &str,
) -> Result<ExtractedMetadata, CorpusError> {
    let prompt = build_prompt(preview, filename);
    let response = model
        .complete(&prompt, &[])
        .await
        .map_err(|e| CorpusError::Extraction(e.to_string()))?;
    parse_metadata_response(&response)
}

pub fn build_prompt(preview: &str, filename: &str) -> String {
    let context: String = preview.chars().take(PREVIEW_LIMIT).collect();
    format!(
        r#"You are a document analysis assistant. Analyze the following excerpt from the file "{filename}":

---BEGIN DOCUMENT---
{context}
---END DOCUMENT---

Extract the following and answer with strict JSON only, no Markdown:
1. "doc_type": the document category (e.g. contract, technical manual, financial report, other)
2. "summary": a short summary of at most 50 characters
3. "keywords": up to 5 key entities, as a list of strings
4. "doc_date": the main date mentioned in the document as YYYY-MM-DD, or null

Example:
{{
    "doc_type": "contract",
    "summary": "Server procurement agreement",
    "keywords": ["servers", "procurement"],
    "doc_date": "2025-01-01"
}}"#
    )
}

/// Validate a raw model response.
pub fn parse_metadata_response(raw: &str) -> Result<ExtractedMetadata, CorpusError> {
    let json = strip_code_fences(raw);
    let parsed: RawMetadata =
        serde_json::from_str(json).map_err(|e| CorpusError::Extraction(e.to_string()))?;

    let doc_type = parsed
        .doc_type
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CorpusError::Extraction("missing doc_type".into()))?;
    let summary = parsed
        .summary
        .map(|s| s.trim().to_string())
        .ok_or_else(|| CorpusError::Extraction("missing summary".into()))?;

    let keywords = parsed
        .keywords
        .unwrap_or_default()
        .into_iter()
        // Tags are stored comma-joined.
        .map(|k| k.replace(',', " ").split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect();

    let doc_date = parsed
        .doc_date
        .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

    Ok(ExtractedMetadata {
        doc_type,
        summary,
        keywords,
        doc_date,
    })
}

/// Remove ```json fences and any chatter around the JSON object.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GroundingImage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: anyhow::Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, prompt: &str, images: &[GroundingImage]) -> anyhow::Result<String> {
            assert!(images.is_empty());
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    #[test]
    fn fenced_json_is_parsed() {
        let raw = "```json\n{\"doc_type\": \"Contract\", \"summary\": \"Service agreement\", \"keywords\": [\"A\", \"B\"], \"doc_date\": \"2025-01-01\"}\n```";
        let meta = parse_metadata_response(raw).unwrap();
        assert_eq!(meta.doc_type, "Contract");
        assert_eq!(meta.keywords, vec!["A", "B"]);
        assert_eq!(meta.doc_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn keywords_capped_and_bad_date_dropped() {
        let raw = r#"{"doc_type": "Report", "summary": "s", "keywords": ["1","2","3","4","5","6","7"], "doc_date": "sometime in 2024"}"#;
        let meta = parse_metadata_response(raw).unwrap();
        assert_eq!(meta.keywords.len(), MAX_KEYWORDS);
        assert!(meta.doc_date.is_none());
    }

    #[test]
    fn commas_in_keywords_are_removed() {
        let meta = parse_metadata_response(
            r#"{"doc_type": "Invoice", "summary": "s", "keywords": ["Acme, Inc.", " , ", "net 30"]}"#,
        )
        .unwrap();
        assert_eq!(meta.keywords, vec!["Acme Inc.", "net 30"]);
    }

    #[test]
    fn null_date_and_missing_keywords_are_fine() {
        let raw = r#"{"doc_type": "Memo", "summary": "s", "doc_date": null}"#;
        let meta = parse_metadata_response(raw).unwrap();
        assert!(meta.keywords.is_empty());
        assert!(meta.doc_date.is_none());
    }

    #[test]
    fn missing_doc_type_is_an_error() {
        let raw = r#"{"summary": "s", "keywords": []}"#;
        assert!(matches!(
            parse_metadata_response(raw),
            Err(CorpusError::Extraction(_))
        ));
    }

    #[test]
    fn long_summary_is_not_truncated() {
        let long = "x".repeat(80);
        let raw = format!(r#"{{"doc_type": "Memo", "summary": "{}"}}"#, long);
        assert_eq!(parse_metadata_response(&raw).unwrap().summary, long);
    }

    #[test]
    fn prompt_preview_is_bounded() {
        let preview = "y".repeat(PREVIEW_LIMIT + 500);
        let prompt = build_prompt(&preview, "big.pdf");
        assert!(prompt.contains(&"y".repeat(PREVIEW_LIMIT)));
        assert!(!prompt.contains(&"y".repeat(PREVIEW_LIMIT + 1)));
        assert!(prompt.contains("big.pdf"));
    }

    #[tokio::test]
    async fn extraction_reads_contract_date() {
        let model = Scripted::ok(
            r#"{"doc_type": "Contract", "summary": "Service Agreement between A and B", "keywords": ["A", "B"], "doc_date": "2025-01-01"}"#,
        );
        let meta = extract_metadata(
            &model,
            "Service Agreement dated 2025-01-01 between A and B",
            "contract.pdf",
        )
        .await;
        assert_eq!(meta.doc_date, NaiveDate::from_ymd_opt(2025, 1, 1));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Service Agreement dated 2025-01-01"));
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back() {
        let model = Scripted::ok("I think this is a contract.");
        let meta = extract_metadata(&model, "text", "a.pdf").await;
        assert_eq!(meta, ExtractedMetadata::fallback());
    }

    #[tokio::test]
    async fn model_error_falls_back() {
        let model = Scripted {
            reply: Err(anyhow::anyhow!("quota exceeded")),
            prompts: Mutex::new(Vec::new()),
        };
        let meta = extract_metadata(&model, "text", "a.pdf").await;
        assert_eq!(meta, ExtractedMetadata::fallback());
    }
}
