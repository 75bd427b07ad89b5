//! Embedded vector index.
//!
//! Entries live in a SQLite file opened in exclusive locking mode over a
//! single pooled connection, so the storage path belongs to exactly one
//! handle. A second handle on the same path cannot take the lock and fails
//! to open. The application obtains its handle through [`shared`], which
//! constructs it once per process and hands every caller the same one.
//!
//! A collection is created lazily by the first [`VectorIndex::upsert`] and
//! remembers the embedding model and dimension it was created with.
//! Similarity search is brute-force cosine over the collection.

use sqlx::sqlite::{SqliteConnectOptions, SqliteLockingMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::CorpusError;
use crate::models::{Chunk, ExtractedMetadata, ScoredChunk};

static SHARED: OnceCell<Arc<VectorIndex>> = OnceCell::const_new();

/// The process-wide index handle.
///
/// The first successful call opens the index at `path`; every later call
/// returns that same handle regardless of its arguments. A failed open
/// leaves the cell empty so a later call may try again.
pub async fn shared(path: &Path, collection: &str) -> Result<Arc<VectorIndex>, CorpusError> {
    let handle = SHARED
        .get_or_try_init(|| async { VectorIndex::open(path, collection).await.map(Arc::new) })
        .await?;
    if handle.path() != path || handle.collection() != collection {
        warn!(
            requested = %path.display(),
            open = %handle.path().display(),
            "vector index already open; reusing existing handle"
        );
    }
    Ok(Arc::clone(handle))
}

pub struct VectorIndex {
    pool: SqlitePool,
    path: PathBuf,
    collection: String,
}

impl VectorIndex {
    /// Open the index at `path`, taking the exclusive storage lock.
    pub async fn open(path: &Path, collection: &str) -> Result<Self, CorpusError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .locking_mode(SqliteLockingMode::Exclusive)
            .busy_timeout(Duration::from_millis(250));

        // One long-lived connection: recycling it would drop the lock.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(CorpusError::index)?;

        let index = Self {
            pool,
            path: path.to_path_buf(),
            collection: collection.to_string(),
        };
        index.init_schema().await?;
        info!(path = %path.display(), collection, "vector index opened");
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), CorpusError> {
        let mut conn = self.pool.acquire().await.map_err(CorpusError::index)?;

        // Writing takes the exclusive lock, held for the connection's lifetime.
        sqlx::query("BEGIN EXCLUSIVE")
            .execute(&mut *conn)
            .await
            .map_err(CorpusError::index)?;

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                filename TEXT NOT NULL,
                page_label TEXT NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_entries_filename ON entries(collection, filename)",
        ];
        for sql in statements {
            if let Err(e) = sqlx::query(sql).execute(&mut *conn).await {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(CorpusError::index(e));
            }
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(CorpusError::index)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn collection_exists(&self) -> Result<bool, CorpusError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections WHERE name = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(CorpusError::index)?;
        Ok(count > 0)
    }

    /// Remove every entry tagged with `filename`. A missing collection or no
    /// matching entries both count as success. Returns the number removed.
    pub async fn delete_by_filename(&self, filename: &str) -> Result<u64, CorpusError> {
        if !self.collection_exists().await? {
            debug!(filename, "no collection yet, nothing to purge");
            return Ok(0);
        }

        let result = sqlx::query("DELETE FROM entries WHERE collection = ? AND filename = ?")
            .bind(&self.collection)
            .bind(filename)
            .execute(&self.pool)
            .await
            .map_err(CorpusError::index)?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(filename, removed, "purged vector entries");
        }
        Ok(removed)
    }

    /// Append `chunks` with their `vectors` (same order). No deduplication:
    /// purge a filename first when re-ingesting it.
    ///
    /// `model` names the embedding model; it is recorded when this call
    /// creates the collection.
    pub async fn upsert(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<usize, CorpusError> {
        if chunks.len() != vectors.len() {
            return Err(CorpusError::Index(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let Some(dims) = vectors.first().map(Vec::len) else {
            return Ok(0);
        };
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(CorpusError::Index(
                "vectors in one upsert must share a non-zero dimension".into(),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(CorpusError::index)?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_optional(&mut *tx)
                .await
                .map_err(CorpusError::index)?;
        match existing {
            Some(d) if d as usize != dims => {
                return Err(CorpusError::Index(format!(
                    "collection '{}' holds {}-dimensional vectors, got {}",
                    self.collection, d, dims
                )));
            }
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(&self.collection)
                .bind(model)
                .bind(dims as i64)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *tx)
                .await
                .map_err(CorpusError::index)?;
                info!(collection = %self.collection, model, dims, "created collection");
            }
        }

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let metadata_json =
                serde_json::to_string(&chunk.metadata).map_err(CorpusError::index)?;
            sqlx::query(
                r#"
                INSERT INTO entries (id, collection, filename, page_label, text, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&self.collection)
            .bind(&chunk.filename)
            .bind(&chunk.page_label)
            .bind(&chunk.text)
            .bind(metadata_json)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(CorpusError::index)?;
        }

        tx.commit().await.map_err(CorpusError::index)?;
        Ok(chunks.len())
    }

    /// The `k` entries most similar to `query_vec`, best first.
    pub async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>, CorpusError> {
        let rows = sqlx::query(
            r#"
            SELECT id, filename, page_label, text, metadata_json, embedding
            FROM entries
            WHERE collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(CorpusError::index)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(CorpusError::index)?;
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            let metadata_json: String = row.try_get("metadata_json").map_err(CorpusError::index)?;
            let metadata: ExtractedMetadata =
                serde_json::from_str(&metadata_json).map_err(CorpusError::index)?;
            scored.push(ScoredChunk {
                chunk: Chunk {
                    id: row.try_get("id").map_err(CorpusError::index)?,
                    filename: row.try_get("filename").map_err(CorpusError::index)?,
                    page_label: row.try_get("page_label").map_err(CorpusError::index)?,
                    text: row.try_get("text").map_err(CorpusError::index)?,
                    metadata,
                },
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Number of entries tagged with `filename`.
    pub async fn count_for(&self, filename: &str) -> Result<i64, CorpusError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ? AND filename = ?")
            .bind(&self.collection)
            .bind(filename)
            .fetch_one(&self.pool)
            .await
            .map_err(CorpusError::index)
    }
}
