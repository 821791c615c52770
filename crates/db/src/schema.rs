use sqlx::PgPool;

use mirror_common::error::{MirrorError, MirrorResult};

const SCHEMA_SQL: &str = include_str!("../migrations/0001_mirror_schema.sql");

/// Create the mirror tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> MirrorResult<()> {
    tracing::info!("ensuring mirror schema");
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;
    Ok(())
}
