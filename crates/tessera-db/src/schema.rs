//! Embedded schema DDL.
//!
//! Tessera manages its own four tables; migration tooling for the wider
//! deployment lives outside this crate. `apply_schema` is idempotent and
//! safe to run at every startup.

use sqlx::PgPool;

use tessera_core::{Error, Result};

/// DDL for all tessera tables, idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS source_objects (
    id              UUID PRIMARY KEY,
    notebook_id     UUID,
    title           TEXT,
    object_type     TEXT NOT NULL,
    cleaned_text    TEXT,
    status          TEXT NOT NULL DEFAULT 'new',
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS ingestion_jobs (
    id                  UUID PRIMARY KEY,
    job_type            TEXT NOT NULL,
    source_identifier   TEXT NOT NULL,
    original_file_name  TEXT,
    status              TEXT NOT NULL DEFAULT 'queued',
    priority            INTEGER NOT NULL DEFAULT 0,
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_attempt_at     TIMESTAMPTZ,
    next_attempt_at     BIGINT,
    progress            JSONB,
    error_info          TEXT,
    failed_stage        TEXT,
    job_specific_data   JSONB,
    related_object_id   UUID REFERENCES source_objects(id) ON DELETE SET NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    completed_at        TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_due
    ON ingestion_jobs (status, priority DESC, created_at ASC);

CREATE TABLE IF NOT EXISTS chunks (
    id                  UUID PRIMARY KEY,
    object_id           UUID NOT NULL REFERENCES source_objects(id) ON DELETE CASCADE,
    notebook_id         UUID,
    chunk_idx           INTEGER NOT NULL,
    content             TEXT NOT NULL,
    summary             TEXT,
    tags_json           TEXT,
    propositions_json   TEXT,
    token_count         INTEGER,
    created_at          TIMESTAMPTZ NOT NULL,
    UNIQUE (object_id, chunk_idx)
);

CREATE TABLE IF NOT EXISTS embedding_records (
    chunk_id    UUID PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
    model       TEXT NOT NULL,
    vector_id   TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_embedding_records_vector_id
    ON embedding_records (vector_id);
"#;

/// Apply the embedded schema to the given pool.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_all_tables() {
        for table in [
            "source_objects",
            "ingestion_jobs",
            "chunks",
            "embedding_records",
        ] {
            assert!(SCHEMA.contains(table), "missing table {table}");
        }
    }

    #[test]
    fn test_chunk_position_is_unique_per_object() {
        assert!(SCHEMA.contains("UNIQUE (object_id, chunk_idx)"));
    }
}
