//! Chunk repository (PostgreSQL).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use tessera_core::{new_v7, Chunk, ChunkPayload, ChunkRepository, Error, Result};

/// PostgreSQL implementation of [`ChunkRepository`].
///
/// Bulk insert and bulk delete each execute as one statement, so a saga
/// step either lands all of its rows or none of them.
pub struct PgChunkRepository {
    pool: PgPool,
}

impl PgChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_chunk_row(row: sqlx::postgres::PgRow) -> Chunk {
        Chunk {
            id: row.get("id"),
            object_id: row.get("object_id"),
            notebook_id: row.get("notebook_id"),
            chunk_idx: row.get("chunk_idx"),
            content: row.get("content"),
            summary: row.get("summary"),
            tags_json: row.get("tags_json"),
            propositions_json: row.get("propositions_json"),
            token_count: row.get("token_count"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn add_bulk(&self, payloads: &[ChunkPayload]) -> Result<Vec<Uuid>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let ids: Vec<Uuid> = payloads.iter().map(|_| new_v7()).collect();

        let mut builder = QueryBuilder::new(
            "INSERT INTO chunks \
             (id, object_id, notebook_id, chunk_idx, content, summary, tags_json, \
              propositions_json, token_count, created_at) ",
        );
        builder.push_values(payloads.iter().zip(ids.iter()), |mut b, (payload, id)| {
            b.push_bind(id)
                .push_bind(payload.object_id)
                .push_bind(payload.notebook_id)
                .push_bind(payload.chunk_idx)
                .push_bind(&payload.content)
                .push_bind(&payload.summary)
                .push_bind(&payload.tags_json)
                .push_bind(&payload.propositions_json)
                .push_bind(payload.token_count)
                .push_bind(now);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(ids)
    }

    async fn list_by_object(&self, object_id: Uuid) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, object_id, notebook_id, chunk_idx, content, summary, tags_json, \
                    propositions_json, token_count, created_at \
             FROM chunks WHERE object_id = $1 \
             ORDER BY chunk_idx ASC",
        )
        .bind(object_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_chunk_row).collect())
    }

    async fn delete_by_ids(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("DELETE FROM chunks WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn count_for_object(&self, object_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE object_id = $1")
            .bind(object_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}
