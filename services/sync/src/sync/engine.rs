//! Per-entity incremental loop.
//!
//! One run walks the entity in `(cursor, id)` order from the checkpoint
//! (minus the overlap window) until a short page. Each non-empty page is
//! committed in a single unit of work: rows, checkpoint and run counters
//! land together or not at all.

use mirror_common::CursorPosition;
use mirror_db::raw_records::repositories::RawRecordRepository;
use mirror_db::sync::models::{RunProgress, RunStatus};
use mirror_db::sync::repositories::SyncLedgerRepository;
use mirror_db::{UnitOfWork, UnitOfWorkFactory};
use serde_json::Value;
use uuid::Uuid;

use super::descriptor::EntityDescriptor;
use super::runner::EntityReport;
use super::SyncError;
use crate::rpc::models::parse_source_timestamp;
use crate::sink::{record_id, RecordSink};
use crate::source::RecordSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    LoadingState,
    Fetching,
    Committing,
    AdvancingPage,
    Done,
    Failed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadingState => "loading-state",
            Self::Fetching => "fetching",
            Self::Committing => "committing",
            Self::AdvancingPage => "advancing-page",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

pub struct SyncEngine<S, F, R, L> {
    source: S,
    uow_factory: F,
    sink: RecordSink<R>,
    ledger: L,
    reap_stale_runs: bool,
}

/// What a completed page loop leaves behind.
struct LoopOutcome {
    progress: RunProgress,
    checkpoint: Option<CursorPosition>,
}

impl<S, F, R, L> SyncEngine<S, F, R, L>
where
    S: RecordSource,
    F: UnitOfWorkFactory,
    R: RawRecordRepository<F::Uow>,
    L: SyncLedgerRepository<F::Uow>,
{
    pub fn new(source: S, uow_factory: F, records: R, ledger: L) -> Self {
        Self {
            source,
            uow_factory,
            sink: RecordSink::new(records),
            ledger,
            reap_stale_runs: false,
        }
    }

    /// Fail `running` rows left by a crashed process before each entity run.
    /// Only enable while holding the single-runner lock.
    pub fn with_stale_run_reaping(mut self, enabled: bool) -> Self {
        self.reap_stale_runs = enabled;
        self
    }

    /// Run one entity to completion or failure. Errors are recorded on the
    /// run and returned in the report, never propagated.
    pub async fn sync_entity(&self, entity: &EntityDescriptor) -> EntityReport {
        let run_id = Uuid::new_v4();

        if self.reap_stale_runs {
            let reason = format!("abandoned: superseded by run {run_id}");
            match self.ledger.abandon_stale_runs(&entity.name, &reason).await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(entity = %entity.name, abandoned = n, "failed stale running runs"),
                Err(e) => {
                    tracing::error!(entity = %entity.name, error = %e, "could not reap stale runs");
                    return EntityReport::failed(&entity.name, None, RunProgress::default(), None, e.to_string());
                }
            }
        }

        if let Err(e) = self.ledger.start_run(&entity.name, run_id).await {
            tracing::error!(entity = %entity.name, error = %e, "could not start run");
            return EntityReport::failed(&entity.name, None, RunProgress::default(), None, e.to_string());
        }
        tracing::info!(entity = %entity.name, %run_id, "entity sync started");

        let mut progress = RunProgress::default();
        let mut checkpoint = None;

        let result = match self.run_pages(entity, run_id, &mut progress, &mut checkpoint).await {
            Ok(outcome) => self.finish_success(entity, run_id, outcome).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => report,
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    entity = %entity.name,
                    %run_id,
                    state = EngineState::Failed.as_str(),
                    pages = progress.pages_processed,
                    error = %message,
                    "entity sync failed"
                );
                if let Err(finish_err) = self
                    .ledger
                    .finish_run(run_id, RunStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(%run_id, error = %finish_err, "could not mark run failed");
                }
                EntityReport::failed(&entity.name, Some(run_id), progress, checkpoint, message)
            }
        }
    }

    async fn finish_success(
        &self,
        entity: &EntityDescriptor,
        run_id: Uuid,
        outcome: LoopOutcome,
    ) -> Result<EntityReport, SyncError> {
        self.ledger
            .mark_last_successful_run(&entity.name, &entity.cursor_field, run_id)
            .await?;
        let run = self.ledger.finish_run(run_id, RunStatus::Success, None).await?;

        tracing::info!(
            entity = %entity.name,
            %run_id,
            state = EngineState::Done.as_str(),
            records_read = run.records_read,
            records_upserted = run.records_upserted,
            pages = run.pages_processed,
            "entity sync completed"
        );

        Ok(EntityReport::succeeded(
            &entity.name,
            run_id,
            outcome.progress,
            outcome.checkpoint,
        ))
    }

    /// The page loop. `progress` and `checkpoint` track committed state so the
    /// caller can report it even when a later page fails.
    async fn run_pages(
        &self,
        entity: &EntityDescriptor,
        run_id: Uuid,
        progress: &mut RunProgress,
        checkpoint: &mut Option<CursorPosition>,
    ) -> Result<LoopOutcome, SyncError> {
        tracing::debug!(entity = %entity.name, %run_id, state = EngineState::LoadingState.as_str());
        let stored = self.ledger.get_checkpoint(&entity.name).await?;

        if let Some(cp) = &stored {
            if cp.cursor_field != entity.cursor_field {
                tracing::warn!(
                    entity = %entity.name,
                    stored = %cp.cursor_field,
                    configured = %entity.cursor_field,
                    "checkpoint was produced with a different cursor field; using configured field"
                );
            }
        }

        // A position taken under another cursor field still seeds the window
        // but is not a floor for the positions this run commits.
        let mut floor = stored
            .as_ref()
            .filter(|cp| cp.cursor_field == entity.cursor_field)
            .and_then(|cp| cp.position);
        *checkpoint = stored.and_then(|cp| cp.position);
        let window_start = checkpoint.and_then(|pos| pos.window_start(entity.overlap));
        let page_size = usize::try_from(entity.page_size).unwrap_or(usize::MAX);
        let mut after: Option<CursorPosition> = None;
        let mut page: u64 = 0;

        loop {
            tracing::debug!(
                entity = %entity.name,
                %run_id,
                state = EngineState::Fetching.as_str(),
                page = page + 1,
                window_start = ?window_start,
                after = ?after
            );
            let query = entity.page_query(window_start, after);
            let records = self.source.fetch_page(&query).await?;
            if records.is_empty() {
                break;
            }

            let page_max = page_max_position(&records, &entity.cursor_field)?;
            // Overlap re-delivery must not move the durable position backwards.
            let target = floor.map_or(page_max, |current| current.max(page_max));

            tracing::debug!(
                entity = %entity.name,
                %run_id,
                state = EngineState::Committing.as_str(),
                page = page + 1,
                records = records.len()
            );
            let delta = self.commit_page(entity, run_id, &records, target).await?;

            page += 1;
            *progress += delta;
            *checkpoint = Some(target);
            floor = Some(target);
            after = Some(page_max);

            tracing::info!(
                entity = %entity.name,
                %run_id,
                state = EngineState::AdvancingPage.as_str(),
                page,
                records = records.len(),
                position = %page_max,
                "page committed"
            );

            if records.len() < page_size {
                break;
            }
        }

        Ok(LoopOutcome {
            progress: *progress,
            checkpoint: *checkpoint,
        })
    }

    async fn commit_page(
        &self,
        entity: &EntityDescriptor,
        run_id: Uuid,
        records: &[Value],
        position: CursorPosition,
    ) -> Result<RunProgress, SyncError> {
        let mut uow = self.uow_factory.begin().await?;

        let written = async {
            let upserted = self
                .sink
                .upsert_batch(&mut uow, &entity.name, records, run_id)
                .await?;
            self.ledger
                .advance_checkpoint(&mut uow, &entity.name, &entity.cursor_field, position, run_id)
                .await?;
            let delta = RunProgress::page(records.len(), upserted);
            self.ledger.record_progress(&mut uow, run_id, delta).await?;
            Ok::<_, SyncError>(delta)
        }
        .await;

        match written {
            Ok(delta) => {
                uow.commit().await?;
                Ok(delta)
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    tracing::warn!(%run_id, error = %rollback_err, "page rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Lexicographic maximum of `(cursor, id)` over a page. Any record without a
/// usable cursor value or id rejects the whole page.
pub fn page_max_position(records: &[Value], cursor_field: &str) -> Result<CursorPosition, SyncError> {
    let mut max: Option<CursorPosition> = None;
    for record in records {
        let id = record_id(record)
            .ok_or_else(|| SyncError::Validation("record without integer id".to_string()))?;
        let raw = record.get(cursor_field).unwrap_or(&Value::Null);
        let value = parse_source_timestamp(raw)
            .map_err(|e| SyncError::Validation(format!("id {id}: {cursor_field}: {e}")))?
            .ok_or_else(|| SyncError::Validation(format!("id {id}: {cursor_field} is empty")))?;
        let position = CursorPosition::new(value, id);
        max = Some(max.map_or(position, |m| m.max(position)));
    }
    max.ok_or_else(|| SyncError::Validation("empty page has no position".to_string()))
}
