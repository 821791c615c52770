use async_trait::async_trait;

use crate::raw_records::models::RawRecord;
use crate::unit_of_work::UnitOfWork;
use mirror_common::error::MirrorResult;

#[async_trait]
pub trait RawRecordRepository<U: UnitOfWork>: Send + Sync {
    /// Insert or overwrite rows keyed by (entity_name, source_id) inside `uow`.
    /// Returns the number of rows written.
    async fn upsert_batch(&self, uow: &mut U, rows: &[RawRecord]) -> MirrorResult<u64>;
}
