//! Turns fetched source records into mirror rows and writes them through the
//! caller's unit of work.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mirror_db::raw_records::models::RawRecord;
use mirror_db::raw_records::repositories::RawRecordRepository;
use mirror_db::UnitOfWork;
use serde_json::Value;
use uuid::Uuid;

use crate::rpc::models::parse_source_timestamp;
use crate::sync::SyncError;

pub struct RecordSink<R> {
    repo: R,
}

impl<R> RecordSink<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Validate every record, then upsert the batch. Nothing is written if any
    /// record is invalid. Returns the number of rows written.
    pub async fn upsert_batch<U>(
        &self,
        uow: &mut U,
        entity_name: &str,
        records: &[Value],
        run_id: Uuid,
    ) -> Result<u64, SyncError>
    where
        U: UnitOfWork,
        R: RawRecordRepository<U>,
    {
        let rows = normalize_batch(entity_name, records, run_id, Utc::now())?;
        if rows.is_empty() {
            return Ok(0);
        }
        Ok(self.repo.upsert_batch(uow, &rows).await?)
    }
}

/// Normalize a page. A source id seen twice keeps its last occurrence, since a
/// single upsert statement cannot touch the same key twice.
pub fn normalize_batch(
    entity_name: &str,
    records: &[Value],
    run_id: Uuid,
    synced_at: DateTime<Utc>,
) -> Result<Vec<RawRecord>, SyncError> {
    let mut rows: Vec<RawRecord> = Vec::with_capacity(records.len());
    let mut index: HashMap<i64, usize> = HashMap::with_capacity(records.len());
    for record in records {
        let row = normalize_record(entity_name, record, run_id, synced_at)?;
        match index.get(&row.source_id) {
            Some(&at) => {
                tracing::warn!(entity = entity_name, source_id = row.source_id, "duplicate id in page");
                rows[at] = row;
            }
            None => {
                index.insert(row.source_id, rows.len());
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

pub fn normalize_record(
    entity_name: &str,
    record: &Value,
    run_id: Uuid,
    synced_at: DateTime<Utc>,
) -> Result<RawRecord, SyncError> {
    let object = record
        .as_object()
        .ok_or_else(|| SyncError::Validation(format!("{entity_name}: record is not an object")))?;

    let source_id = record_id(record)
        .ok_or_else(|| SyncError::Validation(format!("{entity_name}: record without integer id")))?;

    let timestamp = |field: &str| -> Result<Option<DateTime<Utc>>, SyncError> {
        match object.get(field) {
            None => Ok(None),
            Some(value) => parse_source_timestamp(value).map_err(|e| {
                SyncError::Validation(format!("{entity_name} id {source_id}: {field}: {e}"))
            }),
        }
    };

    Ok(RawRecord {
        entity_name: entity_name.to_string(),
        source_id,
        source_write_date: timestamp("write_date")?,
        source_create_date: timestamp("create_date")?,
        payload: record.clone(),
        synced_at,
        run_id,
    })
}

/// Integer `id` of a record, if it has one.
pub fn record_id(record: &Value) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}
