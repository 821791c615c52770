use async_trait::async_trait;
use uuid::Uuid;

use crate::sync::models::{Checkpoint, RunProgress, RunStatus, SyncRun};
use crate::unit_of_work::UnitOfWork;
use mirror_common::error::MirrorResult;
use mirror_common::CursorPosition;

#[async_trait]
pub trait SyncLedgerRepository<U: UnitOfWork>: Send + Sync {
    async fn get_checkpoint(&self, entity_name: &str) -> MirrorResult<Option<Checkpoint>>;

    /// Move the entity's checkpoint to `position` inside the page's unit of work.
    async fn advance_checkpoint(
        &self,
        uow: &mut U,
        entity_name: &str,
        cursor_field: &str,
        position: CursorPosition,
        run_id: Uuid,
    ) -> MirrorResult<()>;

    /// Record `run_id` as the latest run that finished the entity cleanly.
    /// Creates the checkpoint row (without a position) if none exists yet.
    async fn mark_last_successful_run(
        &self,
        entity_name: &str,
        cursor_field: &str,
        run_id: Uuid,
    ) -> MirrorResult<()>;

    async fn start_run(&self, entity_name: &str, run_id: Uuid) -> MirrorResult<SyncRun>;

    /// Add `delta` to the run's counters inside the page's unit of work.
    async fn record_progress(&self, uow: &mut U, run_id: Uuid, delta: RunProgress) -> MirrorResult<()>;

    /// Finalize a running run. Fails with `Validation` if it is not running.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> MirrorResult<SyncRun>;

    /// Fail every `running` run of the entity. Only safe while holding the
    /// single-runner lock.
    async fn abandon_stale_runs(&self, entity_name: &str, reason: &str) -> MirrorResult<u64>;

    async fn list_checkpoints(&self) -> MirrorResult<Vec<Checkpoint>>;

    /// Most recent runs, newest first.
    async fn latest_runs(&self, limit: i64) -> MirrorResult<Vec<SyncRun>>;
}
