use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

use crate::raw_records::models::RawRecord;
use crate::raw_records::repositories::RawRecordRepository;
use crate::unit_of_work::PgUnitOfWork;
use mirror_common::error::{MirrorError, MirrorResult};

/// Rows per insert statement; keeps the bind count well under the protocol limit.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

#[derive(Clone)]
pub struct PgRawRecordRepository {
    pool: PgPool,
}

impl PgRawRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> RawRecord {
        RawRecord {
            entity_name: row.get("entity_name"),
            source_id: row.get("source_id"),
            source_write_date: row.get("source_write_date"),
            source_create_date: row.get("source_create_date"),
            payload: row.get("payload"),
            synced_at: row.get("synced_at"),
            run_id: row.get("run_id"),
        }
    }

    pub async fn get(&self, entity_name: &str, source_id: i64) -> MirrorResult<Option<RawRecord>> {
        let row = sqlx::query(
            "select entity_name, source_id, source_write_date, source_create_date, payload, synced_at, run_id
             from raw_records
             where entity_name = $1 and source_id = $2",
        )
        .bind(entity_name)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }
}

#[async_trait]
impl RawRecordRepository<PgUnitOfWork> for PgRawRecordRepository {
    async fn upsert_batch(&self, uow: &mut PgUnitOfWork, rows: &[RawRecord]) -> MirrorResult<u64> {
        let mut written = 0;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "insert into raw_records
                 (entity_name, source_id, source_write_date, source_create_date, payload, synced_at, run_id) ",
            );

            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.entity_name.clone())
                    .push_bind(row.source_id)
                    .push_bind(row.source_write_date)
                    .push_bind(row.source_create_date)
                    .push_bind(row.payload.clone())
                    .push_bind(row.synced_at)
                    .push_bind(row.run_id);
            });

            qb.push(
                " on conflict (entity_name, source_id) do update set
                   source_write_date = excluded.source_write_date,
                   source_create_date = excluded.source_create_date,
                   payload = excluded.payload,
                   synced_at = excluded.synced_at,
                   run_id = excluded.run_id",
            );

            let result = qb
                .build()
                .execute(&mut **uow)
                .await
                .map_err(|e| MirrorError::Database(e.to_string()))?;
            written += result.rows_affected();
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ensure_schema;
    use crate::unit_of_work::{UnitOfWork, UnitOfWorkFactory};
    use crate::create_pool;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    impl PgRawRecordRepository {
        async fn count_for_entity(&self, entity_name: &str) -> MirrorResult<i64> {
            let row = sqlx::query("select count(*) as cnt from raw_records where entity_name = $1")
                .bind(entity_name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| MirrorError::Database(e.to_string()))?;
            Ok(row.get::<i64, _>("cnt"))
        }
    }

    async fn test_repo() -> Option<(PgRawRecordRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url).await.expect("db should connect");
        ensure_schema(&pool).await.ok()?;
        Some((PgRawRecordRepository::new(pool.clone()), pool))
    }

    fn record(entity: &str, id: i64, name: &str, run_id: Uuid) -> RawRecord {
        RawRecord {
            entity_name: entity.to_string(),
            source_id: id,
            source_write_date: Some(Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()),
            source_create_date: None,
            payload: serde_json::json!({ "id": id, "name": name }),
            synced_at: Utc::now(),
            run_id,
        }
    }

    fn unique_entity() -> String {
        format!("test.entity.{}", Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn upsert_inserts_new_rows() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let entity = unique_entity();
        let run = Uuid::new_v4();

        let mut uow = pool.begin().await.expect("begin");
        let written = repo
            .upsert_batch(&mut uow, &[record(&entity, 1, "a", run), record(&entity, 2, "b", run)])
            .await
            .expect("upsert");
        UnitOfWork::commit(uow).await.expect("commit");

        assert_eq!(written, 2);
        assert_eq!(repo.count_for_entity(&entity).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn redelivery_overwrites_in_place() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let entity = unique_entity();
        let first_run = Uuid::new_v4();
        let second_run = Uuid::new_v4();

        for (run, name) in [(first_run, "before"), (second_run, "after")] {
            let mut uow = UnitOfWorkFactory::begin(&pool).await.expect("begin");
            repo.upsert_batch(&mut uow, &[record(&entity, 7, name, run)])
                .await
                .expect("upsert");
            UnitOfWork::commit(uow).await.expect("commit");
        }

        assert_eq!(repo.count_for_entity(&entity).await.unwrap(), 1);
        let stored = repo.get(&entity, 7).await.unwrap().expect("row exists");
        assert_eq!(stored.payload["name"], "after");
        assert_eq!(stored.run_id, second_run);
    }

    #[tokio::test]
    async fn rollback_discards_rows() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let entity = unique_entity();

        let mut uow = UnitOfWorkFactory::begin(&pool).await.expect("begin");
        repo.upsert_batch(&mut uow, &[record(&entity, 1, "a", Uuid::new_v4())])
            .await
            .expect("upsert");
        UnitOfWork::rollback(uow).await.expect("rollback");

        assert_eq!(repo.count_for_entity(&entity).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let mut uow = UnitOfWorkFactory::begin(&pool).await.expect("begin");
        let written = repo.upsert_batch(&mut uow, &[]).await.expect("upsert");
        assert_eq!(written, 0);
    }
}
