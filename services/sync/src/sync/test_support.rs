//! In-memory source and store used by the orchestrator tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mirror_common::error::{MirrorError, MirrorResult};
use mirror_common::{CursorPosition, Domain, Operator};
use mirror_db::raw_records::models::RawRecord;
use mirror_db::raw_records::repositories::RawRecordRepository;
use mirror_db::sync::models::{Checkpoint, RunProgress, RunStatus, SyncRun};
use mirror_db::sync::repositories::SyncLedgerRepository;
use mirror_db::{UnitOfWork, UnitOfWorkFactory};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::rpc::client::RpcClientError;
use crate::rpc::models::format_source_timestamp;
use crate::source::{PageQuery, RecordSource};

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, 0).unwrap()
}

pub fn record(id: i64, write_date: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "name": format!("record {id}"),
        "write_date": format_source_timestamp(write_date),
        "create_date": format_source_timestamp(write_date),
    })
}

// ── Source ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemorySource {
    records: Arc<Vec<Value>>,
    queries: Arc<Mutex<Vec<PageQuery>>>,
    fail_on_call: Option<usize>,
    fail_entity: Option<String>,
}

impl MemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: Arc::new(records),
            queries: Arc::new(Mutex::new(Vec::new())),
            fail_on_call: None,
            fail_entity: None,
        }
    }

    /// Fail the `n`th fetch (1-based) with an exhausted-retries error.
    pub fn failing_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn failing_for_entity(mut self, entity: &str) -> Self {
        self.fail_entity = Some(entity.to_string());
        self
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Value>, RpcClientError> {
        let call = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.clone());
            queries.len()
        };

        if self.fail_on_call == Some(call) || self.fail_entity.as_deref() == Some(query.entity.as_str()) {
            return Err(RpcClientError::MaxRetriesExceeded {
                attempts: 3,
                last_error: "HTTP 503 Service Unavailable: upstream down".to_string(),
            });
        }

        let cursor_field = query.order.split_whitespace().next().unwrap_or("write_date");
        let mut page: Vec<Value> = self
            .records
            .iter()
            .filter(|r| matches(&query.filter, r))
            .cloned()
            .collect();
        page.sort_by(|a, b| {
            let key = |r: &Value| (r[cursor_field].as_str().unwrap_or("").to_string(), r["id"].as_i64());
            key(a).cmp(&key(b))
        });
        page.truncate(query.limit as usize);
        Ok(page)
    }
}

fn matches(domain: &Domain, record: &Value) -> bool {
    match domain {
        Domain::All(items) => items.iter().all(|d| matches(d, record)),
        Domain::Any(items) => items.iter().any(|d| matches(d, record)),
        Domain::Not(inner) => !matches(inner, record),
        Domain::Leaf(c) => {
            let actual = record.get(&c.field).unwrap_or(&Value::Null);
            let ord = compare(actual, &c.value);
            match c.op {
                Operator::Eq => ord == Some(Ordering::Equal),
                Operator::Ne => ord != Some(Ordering::Equal),
                Operator::Gt => ord == Some(Ordering::Greater),
                Operator::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
                Operator::Lt => ord == Some(Ordering::Less),
                Operator::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                other => panic!("operator {} not supported by the memory source", other.as_str()),
            }
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    records: BTreeMap<(String, i64), RawRecord>,
    checkpoints: HashMap<String, Checkpoint>,
    checkpoint_history: Vec<(String, CursorPosition)>,
    runs: HashMap<Uuid, SyncRun>,
    commits: usize,
    checkpoint_calls: usize,
    fail_checkpoint_on_call: Option<usize>,
}

enum Staged {
    Records(Vec<RawRecord>),
    Checkpoint {
        entity_name: String,
        cursor_field: String,
        position: CursorPosition,
        run_id: Uuid,
    },
    Progress(Uuid, RunProgress),
}

/// Store double with the same page semantics as Postgres: writes through a
/// unit of work only become visible on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

pub struct MemoryUow {
    state: Arc<Mutex<State>>,
    staged: Vec<Staged>,
}

impl MemoryStore {
    /// Fail the `n`th `advance_checkpoint` call (1-based).
    pub fn failing_checkpoint_on_call(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_checkpoint_on_call = Some(n);
        self
    }

    pub fn record_ids(&self, entity: &str) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .records
            .keys()
            .filter(|(e, _)| e == entity)
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn record(&self, entity: &str, id: i64) -> Option<RawRecord> {
        let state = self.state.lock().unwrap();
        state.records.get(&(entity.to_string(), id)).cloned()
    }

    pub fn checkpoint(&self, entity: &str) -> Option<Checkpoint> {
        self.state.lock().unwrap().checkpoints.get(entity).cloned()
    }

    pub fn checkpoint_history(&self, entity: &str) -> Vec<CursorPosition> {
        let state = self.state.lock().unwrap();
        state
            .checkpoint_history
            .iter()
            .filter(|(e, _)| e == entity)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn put_checkpoint(&self, checkpoint: Checkpoint) {
        let mut state = self.state.lock().unwrap();
        state.checkpoints.insert(checkpoint.entity_name.clone(), checkpoint);
    }

    pub fn run(&self, run_id: Uuid) -> Option<SyncRun> {
        self.state.lock().unwrap().runs.get(&run_id).cloned()
    }

    pub fn seed_running_run(&self, entity: &str) -> Uuid {
        let run_id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run_id, new_run(entity, run_id));
        run_id
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }
}

fn new_run(entity: &str, run_id: Uuid) -> SyncRun {
    SyncRun {
        run_id,
        entity_name: entity.to_string(),
        status: RunStatus::Running,
        started_at: Utc::now(),
        finished_at: None,
        records_read: 0,
        records_upserted: 0,
        pages_processed: 0,
        error_message: None,
    }
}

fn empty_checkpoint(entity: &str, cursor_field: &str) -> Checkpoint {
    Checkpoint {
        entity_name: entity.to_string(),
        cursor_field: cursor_field.to_string(),
        position: None,
        last_run_id: None,
        last_successful_run_id: None,
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl UnitOfWork for MemoryUow {
    async fn commit(self) -> MirrorResult<()> {
        let mut state = self.state.lock().unwrap();
        for op in self.staged {
            match op {
                Staged::Records(rows) => {
                    for row in rows {
                        state.records.insert((row.entity_name.clone(), row.source_id), row);
                    }
                }
                Staged::Checkpoint {
                    entity_name,
                    cursor_field,
                    position,
                    run_id,
                } => {
                    let cp = state
                        .checkpoints
                        .entry(entity_name.clone())
                        .or_insert_with(|| empty_checkpoint(&entity_name, &cursor_field));
                    cp.cursor_field = cursor_field;
                    cp.position = Some(position);
                    cp.last_run_id = Some(run_id);
                    cp.updated_at = Utc::now();
                    state.checkpoint_history.push((entity_name, position));
                }
                Staged::Progress(run_id, delta) => {
                    if let Some(run) = state.runs.get_mut(&run_id) {
                        run.records_read += delta.records_read;
                        run.records_upserted += delta.records_upserted;
                        run.pages_processed += delta.pages_processed;
                    }
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> MirrorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl UnitOfWorkFactory for MemoryStore {
    type Uow = MemoryUow;

    async fn begin(&self) -> MirrorResult<MemoryUow> {
        Ok(MemoryUow {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        })
    }
}

#[async_trait]
impl RawRecordRepository<MemoryUow> for MemoryStore {
    async fn upsert_batch(&self, uow: &mut MemoryUow, rows: &[RawRecord]) -> MirrorResult<u64> {
        uow.staged.push(Staged::Records(rows.to_vec()));
        Ok(rows.len() as u64)
    }
}

#[async_trait]
impl SyncLedgerRepository<MemoryUow> for MemoryStore {
    async fn get_checkpoint(&self, entity_name: &str) -> MirrorResult<Option<Checkpoint>> {
        Ok(self.checkpoint(entity_name))
    }

    async fn advance_checkpoint(
        &self,
        uow: &mut MemoryUow,
        entity_name: &str,
        cursor_field: &str,
        position: CursorPosition,
        run_id: Uuid,
    ) -> MirrorResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.checkpoint_calls += 1;
            if state.fail_checkpoint_on_call == Some(state.checkpoint_calls) {
                return Err(MirrorError::Database("injected checkpoint failure".to_string()));
            }
        }
        uow.staged.push(Staged::Checkpoint {
            entity_name: entity_name.to_string(),
            cursor_field: cursor_field.to_string(),
            position,
            run_id,
        });
        Ok(())
    }

    async fn mark_last_successful_run(
        &self,
        entity_name: &str,
        cursor_field: &str,
        run_id: Uuid,
    ) -> MirrorResult<()> {
        let mut state = self.state.lock().unwrap();
        let cp = state
            .checkpoints
            .entry(entity_name.to_string())
            .or_insert_with(|| empty_checkpoint(entity_name, cursor_field));
        cp.cursor_field = cursor_field.to_string();
        cp.last_run_id = Some(run_id);
        cp.last_successful_run_id = Some(run_id);
        Ok(())
    }

    async fn start_run(&self, entity_name: &str, run_id: Uuid) -> MirrorResult<SyncRun> {
        let run = new_run(entity_name, run_id);
        self.state.lock().unwrap().runs.insert(run_id, run.clone());
        Ok(run)
    }

    async fn record_progress(
        &self,
        uow: &mut MemoryUow,
        run_id: Uuid,
        delta: RunProgress,
    ) -> MirrorResult<()> {
        let running = self
            .run(run_id)
            .is_some_and(|r| r.status == RunStatus::Running);
        if !running {
            return Err(MirrorError::NotFound(format!("running sync run {run_id}")));
        }
        uow.staged.push(Staged::Progress(run_id, delta));
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> MirrorResult<SyncRun> {
        if !status.is_terminal() {
            return Err(MirrorError::Validation("cannot finish with running".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| MirrorError::NotFound(format!("sync run {run_id}")))?;
        if run.status.is_terminal() {
            return Err(MirrorError::Validation(format!(
                "run {run_id} is already {}",
                run.status.as_str()
            )));
        }
        run.status = status;
        run.finished_at = Some(Utc::now());
        run.error_message = error_message.map(str::to_string);
        Ok(run.clone())
    }

    async fn abandon_stale_runs(&self, entity_name: &str, reason: &str) -> MirrorResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut abandoned = 0;
        for run in state.runs.values_mut() {
            if run.entity_name == entity_name && run.status == RunStatus::Running {
                run.status = RunStatus::Failed;
                run.finished_at = Some(Utc::now());
                run.error_message = Some(reason.to_string());
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }

    async fn list_checkpoints(&self) -> MirrorResult<Vec<Checkpoint>> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<Checkpoint> = state.checkpoints.values().cloned().collect();
        all.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(all)
    }

    async fn latest_runs(&self, limit: i64) -> MirrorResult<Vec<SyncRun>> {
        let state = self.state.lock().unwrap();
        let mut runs: Vec<SyncRun> = state.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(runs)
    }
}
