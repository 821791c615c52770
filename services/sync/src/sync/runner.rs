use mirror_common::CursorPosition;
use mirror_db::raw_records::repositories::RawRecordRepository;
use mirror_db::sync::models::{RunProgress, RunStatus};
use mirror_db::sync::repositories::SyncLedgerRepository;
use mirror_db::UnitOfWorkFactory;
use uuid::Uuid;

use super::descriptor::EntityDescriptor;
use super::engine::SyncEngine;
use crate::source::RecordSource;

/// Outcome of one entity run.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub entity: String,
    /// `None` when the run could not even be recorded.
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub progress: RunProgress,
    pub checkpoint: Option<CursorPosition>,
    pub error: Option<String>,
}

impl EntityReport {
    pub fn succeeded(
        entity: &str,
        run_id: Uuid,
        progress: RunProgress,
        checkpoint: Option<CursorPosition>,
    ) -> Self {
        Self {
            entity: entity.to_string(),
            run_id: Some(run_id),
            status: RunStatus::Success,
            progress,
            checkpoint,
            error: None,
        }
    }

    pub fn failed(
        entity: &str,
        run_id: Option<Uuid>,
        progress: RunProgress,
        checkpoint: Option<CursorPosition>,
        error: String,
    ) -> Self {
        Self {
            entity: entity.to_string(),
            run_id,
            status: RunStatus::Failed,
            progress,
            checkpoint,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Aggregate of one pass over the configured entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub entities: Vec<EntityReport>,
}

impl PassReport {
    pub fn failed(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities.iter().filter(|r| !r.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.entities.iter().all(EntityReport::is_success)
    }

    pub fn totals(&self) -> RunProgress {
        let mut total = RunProgress::default();
        for report in &self.entities {
            total += report.progress;
        }
        total
    }
}

/// Sync every entity in order. A failed entity is recorded and the pass moves
/// on to the next one.
pub async fn run_pass<S, F, R, L>(
    engine: &SyncEngine<S, F, R, L>,
    entities: &[EntityDescriptor],
) -> PassReport
where
    S: RecordSource,
    F: UnitOfWorkFactory,
    R: RawRecordRepository<F::Uow>,
    L: SyncLedgerRepository<F::Uow>,
{
    let mut report = PassReport::default();

    for entity in entities {
        let outcome = engine.sync_entity(entity).await;
        tracing::debug!(
            entity = %outcome.entity,
            status = outcome.status.as_str(),
            checkpoint = ?outcome.checkpoint,
            "entity finished"
        );
        report.entities.push(outcome);
    }

    let totals = report.totals();
    let failed: Vec<&str> = report.failed().map(|r| r.entity.as_str()).collect();
    if failed.is_empty() {
        tracing::info!(
            entities = report.entities.len(),
            records_read = totals.records_read,
            records_upserted = totals.records_upserted,
            pages = totals.pages_processed,
            "sync pass completed"
        );
    } else {
        tracing::error!(
            entities = report.entities.len(),
            failed = ?failed,
            records_read = totals.records_read,
            records_upserted = totals.records_upserted,
            "sync pass completed with failures"
        );
    }

    report
}
