pub mod lock;
pub mod raw_records;
pub mod schema;
pub mod sync;
pub mod unit_of_work;

use mirror_common::error::{MirrorError, MirrorResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use unit_of_work::{PgUnitOfWork, UnitOfWork, UnitOfWorkFactory};

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> MirrorResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))
}
