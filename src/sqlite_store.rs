//! SQLite-backed [`VectorCollection`] implementation.
//!
//! Entries live in `index_entries`, keyed by `(collection, id)`, with the
//! embedding stored as a little-endian f32 BLOB. Queries apply metadata
//! filters in SQL and rank by brute-force cosine similarity in Rust, which
//! is plenty for corpora of a few thousand chunks.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use scriptdocs_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use scriptdocs_core::models::{ChunkMetadata, DocType, DocumentChunk};
use scriptdocs_core::store::{
    rank, CollectionInfo, IndexEntry, MetadataFilter, ScoredEntry, VectorCollection,
};

/// One named collection inside a SQLite index database.
pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
}

impl SqliteCollection {
    /// Wrap a pool whose schema has already been migrated.
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    async fn stored_info(&self) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query("SELECT dims, model FROM collections WHERE name = ?")
            .bind(&self.name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| CollectionInfo {
            dims: row.get::<i64, _>("dims") as usize,
            model: row.get("model"),
        }))
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<DocumentChunk> {
    let doc_type: String = row.get("doc_type");
    let doc_type = DocType::parse(&doc_type)
        .ok_or_else(|| anyhow!("unknown doc_type in index: {}", doc_type))?;
    Ok(DocumentChunk {
        content: row.get("content"),
        metadata: ChunkMetadata {
            source: row.get("source"),
            doc_type,
            title: row.get("title"),
            has_code: row.get("has_code"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            total_chunks: row.get::<i64, _>("total_chunks") as usize,
            content_length: row.get::<i64, _>("content_length") as usize,
        },
    })
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<Option<CollectionInfo>> {
        self.stored_info().await
    }

    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<()> {
        match self.stored_info().await? {
            Some(existing) if !existing.is_compatible(model, dims) => bail!(
                "collection '{}' was built with {} ({} dims), requested {} ({} dims)",
                self.name,
                existing.model,
                existing.dims,
                model,
                dims
            ),
            Some(_) => Ok(()),
            None => {
                sqlx::query(
                    "INSERT INTO collections (name, dims, model, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(&self.name)
                .bind(dims as i64)
                .bind(model)
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        }
    }

    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let dims = self
            .stored_info()
            .await?
            .ok_or_else(|| anyhow!("collection '{}' does not exist", self.name))?
            .dims;
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dims) {
            bail!(
                "embedding for {} has {} dims, collection expects {}",
                bad.id,
                bad.embedding.len(),
                dims
            );
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let meta = &entry.chunk.metadata;
            sqlx::query(
                r#"
                INSERT INTO index_entries (
                    id, collection, content, source, doc_type, title, has_code,
                    chunk_index, total_chunks, content_length, embedding, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    title = excluded.title,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&entry.id)
            .bind(&self.name)
            .bind(&entry.chunk.content)
            .bind(&meta.source)
            .bind(meta.doc_type.as_str())
            .bind(&meta.title)
            .bind(meta.has_code)
            .bind(meta.chunk_index as i64)
            .bind(meta.total_chunks as i64)
            .bind(meta.content_length as i64)
            .bind(vec_to_blob(&entry.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if !self.exists().await? {
            bail!("collection '{}' does not exist", self.name);
        }
        let stored = self.all_ids().await?;
        Ok(ids.iter().filter(|id| stored.contains(*id)).cloned().collect())
    }

    async fn all_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM index_entries WHERE collection = ?")
            .bind(&self.name)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &MetadataFilter,
        k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        if !self.exists().await? {
            bail!("collection '{}' does not exist", self.name);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, content, source, doc_type, title, has_code, chunk_index, \
             total_chunks, content_length, embedding FROM index_entries WHERE collection = ",
        );
        qb.push_bind(self.name.clone());
        if let Some(doc_type) = filter.doc_type {
            qb.push(" AND doc_type = ").push_bind(doc_type.as_str());
        }
        if let Some(source) = &filter.source {
            qb.push(" AND source = ").push_bind(source.clone());
        }
        if let Some(has_code) = filter.has_code {
            qb.push(" AND has_code = ").push_bind(has_code);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            scored.push(ScoredEntry {
                id: row.get("id"),
                chunk: row_to_chunk(row)?,
                score: cosine_similarity(vector, &embedding),
                embedding,
            });
        }
        rank(&mut scored, k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;
        for id in ids {
            removed += sqlx::query("DELETE FROM index_entries WHERE collection = ? AND id = ?")
                .bind(&self.name)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn count_by_doc_type(&self) -> Result<Vec<(DocType, usize)>> {
        let rows = sqlx::query(
            "SELECT doc_type, COUNT(*) AS n FROM index_entries WHERE collection = ? GROUP BY doc_type",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut counts: Vec<(DocType, usize)> = DocType::ALL.iter().map(|t| (*t, 0)).collect();
        for row in &rows {
            let doc_type: String = row.get("doc_type");
            let n: i64 = row.get("n");
            if let Some(slot) = counts
                .iter_mut()
                .find(|(t, _)| Some(*t) == DocType::parse(&doc_type))
            {
                slot.1 = n as usize;
            }
        }
        Ok(counts)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries WHERE collection = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
