use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per created collection, holding its embedding model and dimension
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes created before the model was recorded get an empty model,
    // which never matches a provider and forces a rebuild.
    let model_columns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('collections') WHERE name = 'model'",
    )
    .fetch_one(pool)
    .await?;
    if model_columns == 0 {
        sqlx::query("ALTER TABLE collections ADD COLUMN model TEXT NOT NULL DEFAULT ''")
            .execute(pool)
            .await?;
    }

    // Index entries keyed by content identity
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            id TEXT NOT NULL,
            collection TEXT NOT NULL,
            content TEXT NOT NULL,
            source TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            title TEXT NOT NULL,
            has_code INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            content_length INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_doc_type ON index_entries(collection, doc_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_source ON index_entries(collection, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_adds_model_column_to_older_index() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
        sqlx::query(
            "CREATE TABLE collections (name TEXT PRIMARY KEY, dims INTEGER NOT NULL, created_at INTEGER NOT NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO collections (name, dims, created_at) VALUES ('docs', 3, 0)")
            .execute(&pool)
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let model: String = sqlx::query_scalar("SELECT model FROM collections WHERE name = 'docs'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(model, "");
        pool.close().await;
    }
}
