use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One mirrored source record. `(entity_name, source_id)` is the identity;
/// everything else is overwritten on each delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_name: String,
    pub source_id: i64,
    pub source_write_date: Option<DateTime<Utc>>,
    pub source_create_date: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
    pub synced_at: DateTime<Utc>,
    pub run_id: Uuid,
}
