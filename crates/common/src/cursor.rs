use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Position of a record in the `(cursor value, id)` order used for paging.
///
/// Field order matters: the derived `Ord` compares `value` first and falls
/// back to `id`, which gives a strict total order even when many records
/// share the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub value: DateTime<Utc>,
    pub id: i64,
}

impl CursorPosition {
    pub fn new(value: DateTime<Utc>, id: i64) -> Self {
        Self { value, id }
    }

    /// Lower bound of the next incremental window: the cursor value moved back
    /// by `overlap`. The id is dropped; the window filter is on the value only.
    /// `None` when the subtraction leaves the representable range, which means
    /// the window has no lower bound.
    pub fn window_start(&self, overlap: Duration) -> Option<DateTime<Utc>> {
        self.value.checked_sub_signed(overlap)
    }
}

impl std::fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.value.to_rfc3339(), self.id)
    }
}
