use std::str::FromStr;

use chrono::{DateTime, Utc};
use mirror_common::CursorPosition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable per-entity sync position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub entity_name: String,
    pub cursor_field: String,
    /// `None` until the first non-empty page commits.
    pub position: Option<CursorPosition>,
    pub last_run_id: Option<Uuid>,
    pub last_successful_run_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown run status: {value}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub entity_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records_read: i64,
    pub records_upserted: i64,
    pub pages_processed: i64,
    pub error_message: Option<String>,
}

/// Counter deltas added to a run after a page commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub records_read: i64,
    pub records_upserted: i64,
    pub pages_processed: i64,
}

impl RunProgress {
    /// Deltas for one committed page.
    pub fn page(records_read: usize, records_upserted: u64) -> Self {
        Self {
            records_read: i64::try_from(records_read).unwrap_or(i64::MAX),
            records_upserted: i64::try_from(records_upserted).unwrap_or(i64::MAX),
            pages_processed: 1,
        }
    }
}

impl std::ops::AddAssign for RunProgress {
    fn add_assign(&mut self, rhs: Self) {
        self.records_read += rhs.records_read;
        self.records_upserted += rhs.records_upserted;
        self.pages_processed += rhs.pages_processed;
    }
}
