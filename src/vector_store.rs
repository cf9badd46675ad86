//! Vector store for retrieval-augmented generation.
//!
//! Documents are embedded in batches and stored in a SQLite table keyed by
//! `(collection, id)`, with the vector as a little-endian f32 BLOB. Search
//! is a brute-force cosine scan over one collection.
//!
//! ```text
//! documents ─▶ Embedder::embed (batch) ─▶ INSERT OR REPLACE vectors
//! query     ─▶ embed_query ─▶ cosine over collection ─▶ top k
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, vec_to_blob, Embedder};
use crate::models::Document;

/// Destination for embedded documents.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed and store `docs`. Returns the number stored.
    async fn add_documents(&self, docs: &[Document]) -> Result<usize>;
}

/// One similarity search result.
#[derive(Debug, Clone, Serialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub content: String,
    pub metadata: serde_json::Value,
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl SqliteVectorStore {
    /// Open the store over `pool`, creating its table if needed.
    pub async fn open(
        pool: SqlitePool,
        collection: &str,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            bail!("embedding batch size must be > 0");
        }

        db::ensure_schema(&pool).await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
            embedder,
            batch_size,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Remove every vector in this collection.
    pub async fn delete_collection(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        info!(
            collection = %self.collection,
            removed = result.rows_affected(),
            "cleared vector collection"
        );
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// The `k` stored documents closest to `query`, best first.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<VectorMatch>> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM vectors WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                VectorMatch {
                    id: row.get("id"),
                    score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
                    content: row.get("content"),
                    metadata: serde_json::from_str(&metadata_json)
                        .unwrap_or(serde_json::Value::Null),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(k);
        Ok(matches)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        let mut stored = 0usize;
        let now = chrono::Utc::now().timestamp();

        for batch in docs.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} documents",
                    vectors.len(),
                    batch.len()
                );
            }

            let mut tx = self.pool.begin().await?;
            for (doc, vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO vectors
                        (collection, id, content, metadata_json, model, dims, embedding, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&self.collection)
                .bind(doc.id())
                .bind(&doc.content)
                .bind(doc.metadata().to_string())
                .bind(self.embedder.model_name())
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            stored += batch.len();
            debug!(collection = %self.collection, stored, "stored embedding batch");
        }

        Ok(stored)
    }
}
