use chrono::{DateTime, Duration, Utc};
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_common::{CursorPosition, Domain, Operator};
use mirror_config::EntityConfig;

use crate::rpc::models::format_source_timestamp;
use crate::source::PageQuery;

/// Fields every projection must include for paging and row extraction.
const REQUIRED_FIELDS: &[&str] = &["id", "write_date", "create_date"];

/// Immutable per-run view of one configured entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    pub fields: Vec<String>,
    pub filter: Domain,
    pub cursor_field: String,
    pub overlap: Duration,
    pub page_size: u32,
}

impl EntityDescriptor {
    pub fn from_config(config: &EntityConfig) -> MirrorResult<Self> {
        if config.page_size == 0 {
            return Err(MirrorError::Config(format!(
                "entity {}: page_size must be > 0",
                config.name
            )));
        }
        let overlap = Duration::from_std(config.overlap()).map_err(|_| {
            MirrorError::Config(format!(
                "entity {}: overlap_secs {} is out of range",
                config.name, config.overlap_secs
            ))
        })?;

        Ok(Self {
            name: config.name.clone(),
            fields: complete_projection(&config.fields, &config.cursor_field),
            filter: config.filter.clone().unwrap_or_default(),
            cursor_field: config.cursor_field.clone(),
            overlap,
            page_size: config.page_size,
        })
    }

    pub fn order(&self) -> String {
        format!("{} asc, id asc", self.cursor_field)
    }

    /// Query for the next page.
    ///
    /// `window_start` bounds the whole run from below; `after` is the last
    /// committed position of this run and turns on keyset continuation.
    pub fn page_query(
        &self,
        window_start: Option<DateTime<Utc>>,
        after: Option<CursorPosition>,
    ) -> PageQuery {
        let mut filter = self.filter.clone();

        if let Some(start) = window_start {
            filter = filter.and(Domain::leaf(
                &self.cursor_field,
                Operator::Ge,
                format_source_timestamp(start),
            ));
        }

        if let Some(last) = after {
            let value = format_source_timestamp(last.value);
            let later = Domain::leaf(&self.cursor_field, Operator::Gt, value.clone());
            let same_value_higher_id = Domain::All(vec![
                Domain::leaf(&self.cursor_field, Operator::Eq, value),
                Domain::leaf("id", Operator::Gt, last.id),
            ]);
            filter = filter.and(later.or(same_value_higher_id));
        }

        PageQuery {
            entity: self.name.clone(),
            filter,
            fields: self.fields.clone(),
            order: self.order(),
            limit: self.page_size,
        }
    }
}

/// An empty projection stays empty (all fields). Otherwise the id, the cursor
/// field and both source timestamps are appended when missing.
fn complete_projection(fields: &[String], cursor_field: &str) -> Vec<String> {
    if fields.is_empty() {
        return Vec::new();
    }
    let mut out = fields.to_vec();
    let required = std::iter::once(cursor_field).chain(REQUIRED_FIELDS.iter().copied());
    for field in required {
        if !out.iter().any(|f| f == field) {
            out.push(field.to_string());
        }
    }
    out
}
