//! Embedding record repository (PostgreSQL).

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use tessera_core::{EmbeddingRecord, EmbeddingRepository, Error, Result};

/// PostgreSQL implementation of [`EmbeddingRepository`].
pub struct PgEmbeddingRepository {
    pool: PgPool,
}

impl PgEmbeddingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingRepository for PgEmbeddingRepository {
    async fn add_records(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(
            "INSERT INTO embedding_records (chunk_id, model, vector_id, created_at) ",
        );
        builder.push_values(records, |mut b, record| {
            b.push_bind(record.chunk_id)
                .push_bind(&record.model)
                .push_bind(&record.vector_id)
                .push_bind(record.created_at);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM embedding_records WHERE chunk_id = ANY($1)")
            .bind(chunk_ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_by_chunk_ids(&self, chunk_ids: &[Uuid]) -> Result<Vec<EmbeddingRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT chunk_id, model, vector_id, created_at \
             FROM embedding_records WHERE chunk_id = ANY($1)",
        )
        .bind(chunk_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| EmbeddingRecord {
                chunk_id: row.get("chunk_id"),
                model: row.get("model"),
                vector_id: row.get("vector_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
