//! Source object repository (PostgreSQL).

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use tessera_core::{
    Error, JobType, ObjectRepository, ObjectStatus, Result, SourceObject,
};

/// PostgreSQL implementation of [`ObjectRepository`].
pub struct PgObjectRepository {
    pool: PgPool,
}

impl PgObjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_object_row(row: sqlx::postgres::PgRow) -> Result<SourceObject> {
        let object_type_str: String = row.get("object_type");
        let object_type = JobType::parse(&object_type_str).ok_or_else(|| {
            Error::Serialization(format!("unknown object_type: {object_type_str}"))
        })?;

        let status_str: String = row.get("status");
        let status = ObjectStatus::parse(&status_str)
            .ok_or_else(|| Error::Serialization(format!("unknown object status: {status_str}")))?;

        Ok(SourceObject {
            id: row.get("id"),
            notebook_id: row.get("notebook_id"),
            title: row.get("title"),
            object_type,
            cleaned_text: row.get("cleaned_text"),
            status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl ObjectRepository for PgObjectRepository {
    async fn get(&self, id: Uuid) -> Result<SourceObject> {
        let row = sqlx::query(
            "SELECT id, notebook_id, title, object_type, cleaned_text, status, \
                    created_at, updated_at \
             FROM source_objects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_object_row)
            .transpose()?
            .ok_or(Error::ObjectNotFound(id))
    }

    async fn update_status(&self, id: Uuid, status: ObjectStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE source_objects SET status = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::ObjectNotFound(id));
        }
        Ok(())
    }
}
