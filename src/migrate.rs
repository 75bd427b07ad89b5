use sqlx::SqlitePool;

/// Create the corpus schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per uploaded file; `filename` is the join key with the vector index.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL UNIQUE,
            file_path TEXT NOT NULL,
            upload_time INTEGER NOT NULL,
            doc_type TEXT,
            summary TEXT,
            tags TEXT,
            page_count INTEGER,
            status TEXT NOT NULL CHECK (status IN ('processing', 'completed', 'failed')),
            error_msg TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_upload_time ON documents(upload_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
