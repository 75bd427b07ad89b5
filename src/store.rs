//! Document store: one SQLite row per uploaded file.
//!
//! Records are created as `processing` placeholders at upload time and only
//! the ingestion pipeline moves them to `completed` or `failed`. Deleting a
//! record does not touch the vector index or the uploaded file; callers
//! clean those up.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::error::StorageError;
use crate::migrate;
use crate::models::{DocumentRecord, DocumentStatus, ExtractedMetadata};

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Connect to the database at `path` and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Register `filename` as `processing`.
    ///
    /// An existing record keeps its id but is reset: new path and upload
    /// time, previous metadata and error cleared.
    pub async fn upsert_placeholder(
        &self,
        filename: &str,
        file_path: &str,
    ) -> Result<i64, StorageError> {
        let now = Utc::now().timestamp_millis();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (filename, file_path, upload_time, status)
            VALUES (?, ?, ?, 'processing')
            ON CONFLICT(filename) DO UPDATE SET
                file_path = excluded.file_path,
                upload_time = excluded.upload_time,
                status = 'processing',
                doc_type = NULL,
                summary = NULL,
                tags = NULL,
                page_count = NULL,
                error_msg = NULL
            RETURNING id
            "#,
        )
        .bind(filename)
        .bind(file_path)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn mark_completed(
        &self,
        filename: &str,
        metadata: &ExtractedMetadata,
        page_count: usize,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'completed', doc_type = ?, summary = ?, tags = ?, page_count = ?,
                error_msg = NULL
            WHERE filename = ? AND status = 'processing'
            "#,
        )
        .bind(&metadata.doc_type)
        .bind(&metadata.summary)
        .bind(metadata.joined_tags())
        .bind(page_count as i64)
        .bind(filename)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .rejected_transition(filename, DocumentStatus::Completed)
                .await);
        }
        Ok(())
    }

    /// Record a failure. Metadata columns are left as they are.
    pub async fn mark_failed(&self, filename: &str, error: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'failed', error_msg = ? WHERE filename = ? AND status = 'processing'",
        )
        .bind(error)
        .bind(filename)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(filename, DocumentStatus::Failed).await);
        }
        Ok(())
    }

    /// All records, newest upload first.
    pub async fn list_all(&self) -> Result<Vec<DocumentRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, file_path, upload_time, doc_type, summary, tags, page_count,
                   status, error_msg
            FROM documents
            ORDER BY upload_time DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn get(&self, filename: &str) -> Result<Option<DocumentRecord>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, file_path, upload_time, doc_type, summary, tags, page_count,
                   status, error_msg
            FROM documents
            WHERE filename = ?
            "#,
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Remove the record. Returns whether one existed.
    pub async fn delete(&self, filename: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM documents WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Work out why a status update matched no row.
    async fn rejected_transition(&self, filename: &str, to: DocumentStatus) -> StorageError {
        match self.get(filename).await {
            Ok(Some(record)) if !record.status.can_transition_to(to) => {
                StorageError::InvalidTransition {
                    filename: filename.to_string(),
                    from: record.status,
                    to,
                }
            }
            Ok(Some(_)) | Ok(None) => StorageError::NotFound(filename.to_string()),
            Err(e) => e,
        }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<DocumentRecord, StorageError> {
    let status_text: String = row.try_get("status")?;
    let status = status_text
        .parse::<DocumentStatus>()
        .map_err(StorageError::Corrupt)?;

    let millis: i64 = row.try_get("upload_time")?;
    let upload_time = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("bad upload_time {}", millis)))?;

    let tags: Option<String> = row.try_get("tags")?;

    Ok(DocumentRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        file_path: row.try_get("file_path")?,
        upload_time,
        doc_type: row.try_get("doc_type")?,
        summary: row.try_get("summary")?,
        tags: split_tags(tags.as_deref()),
        page_count: row.try_get("page_count")?,
        status,
        error_msg: row.try_get("error_msg")?,
    })
}

fn split_tags(tags: Option<&str>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, DocumentStore) {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::open(&tmp.path().join("corpus.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn contract_metadata() -> ExtractedMetadata {
        ExtractedMetadata {
            doc_type: "Contract".into(),
            summary: "Service agreement between A and B".into(),
            keywords: vec!["A".into(), "B".into()],
            doc_date: NaiveDate::from_ymd_opt(2025, 1, 1),
        }
    }

    #[tokio::test]
    async fn placeholder_is_idempotent_per_filename() {
        let (_tmp, store) = open_store().await;

        let first = store.upsert_placeholder("a.pdf", "/up/a.pdf").await.unwrap();
        store
            .mark_completed("a.pdf", &contract_metadata(), 3)
            .await
            .unwrap();
        let second = store.upsert_placeholder("a.pdf", "/up/a2.pdf").await.unwrap();

        assert_eq!(first, second);
        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        let record = &all[0];
        assert_eq!(record.status, DocumentStatus::Processing);
        assert_eq!(record.file_path, "/up/a2.pdf");
        assert!(record.doc_type.is_none());
        assert!(record.page_count.is_none());
    }

    #[tokio::test]
    async fn completed_writes_metadata_and_clears_error() {
        let (_tmp, store) = open_store().await;
        store.upsert_placeholder("c.pdf", "/up/c.pdf").await.unwrap();
        store
            .mark_completed("c.pdf", &contract_metadata(), 1)
            .await
            .unwrap();

        let record = store.get("c.pdf").await.unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Completed);
        assert_eq!(record.doc_type.as_deref(), Some("Contract"));
        assert_eq!(record.tags, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(record.page_count, Some(1));
        assert!(record.error_msg.is_none());
    }

    #[tokio::test]
    async fn failed_keeps_other_fields() {
        let (_tmp, store) = open_store().await;
        store.upsert_placeholder("f.pdf", "/up/f.pdf").await.unwrap();
        store.mark_failed("f.pdf", "empty parse").await.unwrap();

        let record = store.get("f.pdf").await.unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.error_msg.as_deref(), Some("empty parse"));
        assert_eq!(record.file_path, "/up/f.pdf");
    }

    #[tokio::test]
    async fn terminal_states_reject_further_transitions() {
        let (_tmp, store) = open_store().await;
        store.upsert_placeholder("t.pdf", "/up/t.pdf").await.unwrap();
        store.mark_failed("t.pdf", "boom").await.unwrap();

        let err = store
            .mark_completed("t.pdf", &contract_metadata(), 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::InvalidTransition {
                from: DocumentStatus::Failed,
                to: DocumentStatus::Completed,
                ..
            }
        ));

        let record = store.get("t.pdf").await.unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn marking_unknown_file_is_not_found() {
        let (_tmp, store) = open_store().await;
        let err = store.mark_failed("ghost.pdf", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(name) if name == "ghost.pdf"));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_removes_row() {
        let (_tmp, store) = open_store().await;
        store.upsert_placeholder("old.pdf", "/up/old.pdf").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.upsert_placeholder("new.pdf", "/up/new.pdf").await.unwrap();

        let names: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.filename)
            .collect();
        assert_eq!(names, vec!["new.pdf", "old.pdf"]);

        assert!(store.delete("old.pdf").await.unwrap());
        assert!(!store.delete("old.pdf").await.unwrap());
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parsed_keywords_survive_storage() {
        let (_tmp, store) = open_store().await;
        let metadata = crate::metadata::parse_metadata_response(
            r#"{"doc_type": "Invoice", "summary": "s", "keywords": ["Acme, Inc.", "net 30"]}"#,
        )
        .unwrap();
        store.upsert_placeholder("i.pdf", "/up/i.pdf").await.unwrap();
        store.mark_completed("i.pdf", &metadata, 1).await.unwrap();

        let record = store.get("i.pdf").await.unwrap().unwrap();
        assert_eq!(record.tags, metadata.keywords);
    }

    #[test]
    fn tags_split_ignores_blanks() {
        assert_eq!(split_tags(Some("a, b,,c ")), vec!["a", "b", "c"]);
        assert!(split_tags(Some("")).is_empty());
        assert!(split_tags(None).is_empty());
    }
}
