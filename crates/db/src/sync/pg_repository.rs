use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{Checkpoint, RunProgress, RunStatus, SyncRun};
use crate::sync::repositories::SyncLedgerRepository;
use crate::unit_of_work::PgUnitOfWork;
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_common::CursorPosition;

const CHECKPOINT_COLUMNS: &str = "entity_name, cursor_field, cursor_value, cursor_id, \
     last_run_id, last_successful_run_id, updated_at";

const RUN_COLUMNS: &str = "run_id, entity_name, status, started_at, finished_at, \
     records_read, records_upserted, pages_processed, error_message";

#[derive(Clone)]
pub struct PgSyncLedgerRepository {
    pool: PgPool,
}

impl PgSyncLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_checkpoint(row: PgRow) -> Checkpoint {
        let value: Option<DateTime<Utc>> = row.get("cursor_value");
        let id: Option<i64> = row.get("cursor_id");
        Checkpoint {
            entity_name: row.get("entity_name"),
            cursor_field: row.get("cursor_field"),
            position: value.zip(id).map(|(v, i)| CursorPosition::new(v, i)),
            last_run_id: row.get("last_run_id"),
            last_successful_run_id: row.get("last_successful_run_id"),
            updated_at: row.get("updated_at"),
        }
    }

    fn map_run(row: PgRow) -> MirrorResult<SyncRun> {
        let status: String = row.get("status");
        Ok(SyncRun {
            run_id: row.get("run_id"),
            entity_name: row.get("entity_name"),
            status: RunStatus::from_str(&status).map_err(MirrorError::Internal)?,
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            records_read: row.get("records_read"),
            records_upserted: row.get("records_upserted"),
            pages_processed: row.get("pages_processed"),
            error_message: row.get("error_message"),
        })
    }

    pub async fn get_run(&self, run_id: Uuid) -> MirrorResult<Option<SyncRun>> {
        let row = sqlx::query(&format!("select {RUN_COLUMNS} from sync_runs where run_id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MirrorError::Database(e.to_string()))?;

        row.map(Self::map_run).transpose()
    }
}

#[async_trait]
impl SyncLedgerRepository<PgUnitOfWork> for PgSyncLedgerRepository {
    async fn get_checkpoint(&self, entity_name: &str) -> MirrorResult<Option<Checkpoint>> {
        let row = sqlx::query(&format!(
            "select {CHECKPOINT_COLUMNS} from sync_checkpoints where entity_name = $1"
        ))
        .bind(entity_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(row.map(Self::map_checkpoint))
    }

    async fn advance_checkpoint(
        &self,
        uow: &mut PgUnitOfWork,
        entity_name: &str,
        cursor_field: &str,
        position: CursorPosition,
        run_id: Uuid,
    ) -> MirrorResult<()> {
        sqlx::query(
            "insert into sync_checkpoints
                 (entity_name, cursor_field, cursor_value, cursor_id, last_run_id, updated_at)
             values ($1, $2, $3, $4, $5, now())
             on conflict (entity_name) do update set
                 cursor_field = excluded.cursor_field,
                 cursor_value = excluded.cursor_value,
                 cursor_id = excluded.cursor_id,
                 last_run_id = excluded.last_run_id,
                 updated_at = now()",
        )
        .bind(entity_name)
        .bind(cursor_field)
        .bind(position.value)
        .bind(position.id)
        .bind(run_id)
        .execute(&mut **uow)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(())
    }

    async fn mark_last_successful_run(
        &self,
        entity_name: &str,
        cursor_field: &str,
        run_id: Uuid,
    ) -> MirrorResult<()> {
        sqlx::query(
            "insert into sync_checkpoints
                 (entity_name, cursor_field, last_run_id, last_successful_run_id, updated_at)
             values ($1, $2, $3, $3, now())
             on conflict (entity_name) do update set
                 cursor_field = excluded.cursor_field,
                 last_run_id = excluded.last_run_id,
                 last_successful_run_id = excluded.last_successful_run_id,
                 updated_at = now()",
        )
        .bind(entity_name)
        .bind(cursor_field)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(())
    }

    async fn start_run(&self, entity_name: &str, run_id: Uuid) -> MirrorResult<SyncRun> {
        let row = sqlx::query(&format!(
            "insert into sync_runs (run_id, entity_name, status, started_at)
             values ($1, $2, 'running', now())
             returning {RUN_COLUMNS}"
        ))
        .bind(run_id)
        .bind(entity_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Self::map_run(row)
    }

    async fn record_progress(
        &self,
        uow: &mut PgUnitOfWork,
        run_id: Uuid,
        delta: RunProgress,
    ) -> MirrorResult<()> {
        let result = sqlx::query(
            "update sync_runs set
                 records_read = records_read + $2,
                 records_upserted = records_upserted + $3,
                 pages_processed = pages_processed + $4
             where run_id = $1 and status = 'running'",
        )
        .bind(run_id)
        .bind(delta.records_read)
        .bind(delta.records_upserted)
        .bind(delta.pages_processed)
        .execute(&mut **uow)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MirrorError::NotFound(format!("running sync run {run_id}")));
        }
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> MirrorResult<SyncRun> {
        if !status.is_terminal() {
            return Err(MirrorError::Validation(format!(
                "cannot finish run {run_id} with status {}",
                status.as_str()
            )));
        }

        let row = sqlx::query(&format!(
            "update sync_runs set status = $2, finished_at = now(), error_message = $3
             where run_id = $1 and status = 'running'
             returning {RUN_COLUMNS}"
        ))
        .bind(run_id)
        .bind(status.as_str())
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        match row {
            Some(row) => Self::map_run(row),
            None => match self.get_run(run_id).await? {
                Some(existing) => Err(MirrorError::Validation(format!(
                    "run {run_id} is already {}",
                    existing.status.as_str()
                ))),
                None => Err(MirrorError::NotFound(format!("sync run {run_id}"))),
            },
        }
    }

    async fn abandon_stale_runs(&self, entity_name: &str, reason: &str) -> MirrorResult<u64> {
        let result = sqlx::query(
            "update sync_runs set status = 'failed', finished_at = now(), error_message = $2
             where entity_name = $1 and status = 'running'",
        )
        .bind(entity_name)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn list_checkpoints(&self) -> MirrorResult<Vec<Checkpoint>> {
        let rows = sqlx::query(&format!(
            "select {CHECKPOINT_COLUMNS} from sync_checkpoints order by entity_name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Self::map_checkpoint).collect())
    }

    async fn latest_runs(&self, limit: i64) -> MirrorResult<Vec<SyncRun>> {
        let rows = sqlx::query(&format!(
            "select {RUN_COLUMNS} from sync_runs order by started_at desc, run_id limit $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MirrorError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_run).collect()
    }
}
