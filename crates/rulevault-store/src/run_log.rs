//! Run-log archive: immutable execution snapshots, one per completed run.
//!
//! The file backend names each snapshot `<stamp>_<original id>` where the
//! stamp is a zero-padded, strictly increasing millisecond value, so
//! lexicographic filename order is chronological order. The relational
//! backend keeps the original run id and orders by `created_at`, with the
//! row id breaking ties.
//!
//! Snapshot fields are serialized independently in the relational backend
//! (`node_log`, `additional_info`, `rule_chain_info`, `metadata`), and a
//! read fails as a whole if any one of them does not decode.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rulevault_core::{Page, RunContext, RunSnapshot, TimestampMs, now_ms};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult, map_err};
use crate::files::{Layout, check_segment, modified_ms, read_optional, remove_optional, write_atomic};
use crate::relational::limit_offset;
use crate::schema::RUN_LOGS;
use crate::sql::SqlClient;
use crate::types::RunLogQuery;

/// Width of the zero-padded stamp prefix on file-backend run ids.
const STAMP_WIDTH: usize = 17;

/// Persistence contract for run snapshots.
pub trait RunLogStore: Send + Sync {
    /// Persist a snapshot for `chain_id` and return the stored run id.
    fn save(&self, owner: &str, chain_id: &str, snapshot: &RunSnapshot) -> StoreResult<String>;

    /// Newest first.
    fn list(&self, owner: &str, query: &RunLogQuery) -> StoreResult<Page<RunSnapshot>>;

    fn get(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<RunSnapshot>;

    fn delete(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<()>;

    /// Remove every run of a chain, returning how many were removed.
    fn delete_by_chain_id(&self, owner: &str, chain_id: &str) -> StoreResult<usize>;
}

fn require_run_id(snapshot: &RunSnapshot) -> StoreResult<()> {
    if snapshot.id.is_empty() {
        return Err(StoreError::Validation("run snapshot has no id".into()));
    }
    Ok(())
}

// ── File backend ──────────────────────────────────────────────────

pub struct FileRunLogs {
    layout: Layout,
    last_stamp: Mutex<TimestampMs>,
}

impl FileRunLogs {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::new(data_dir),
            last_stamp: Mutex::new(0),
        }
    }

    /// A stamp strictly greater than every stamp this instance issued before.
    fn next_stamp(&self) -> StoreResult<TimestampMs> {
        let mut last = self
            .last_stamp
            .lock()
            .map_err(|_| StoreError::Io("run stamp mutex poisoned".into()))?;
        let stamp = now_ms().max(*last + 1);
        *last = stamp;
        Ok(stamp)
    }

    fn read_snapshot(path: &Path) -> StoreResult<Option<RunSnapshot>> {
        match read_optional(path)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(map_err!(Deserialize)),
            None => Ok(None),
        }
    }
}

/// A run file on disk with the key it sorts by.
struct RunFile {
    path: PathBuf,
    stamp: TimestampMs,
    name: String,
}

/// Stamp prefix of a run file name, if it carries one.
fn stamp_prefix(name: &str) -> Option<TimestampMs> {
    let (stamp, _) = name.split_once('_')?;
    (stamp.len() == STAMP_WIDTH)
        .then(|| stamp.parse().ok())
        .flatten()
}

fn collect_run_files(dir: &Path, depth: usize) -> Vec<RunFile> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(depth).max_depth(depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable run entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let stamp = match stamp_prefix(&name) {
            Some(stamp) => stamp,
            None => entry.metadata().map(|m| modified_ms(&m)).unwrap_or_default(),
        };
        files.push(RunFile {
            path: entry.into_path(),
            stamp,
            name,
        });
    }
    files
}

impl RunLogStore for FileRunLogs {
    fn save(&self, owner: &str, chain_id: &str, snapshot: &RunSnapshot) -> StoreResult<String> {
        require_run_id(snapshot)?;
        check_segment("run id", &snapshot.id)?;
        let run_id = format!("{:0width$}_{}", self.next_stamp()?, snapshot.id, width = STAMP_WIDTH);
        let path = self.layout.run_file(owner, chain_id, &run_id)?;

        let mut stored = snapshot.clone();
        stored.id = run_id.clone();
        let bytes = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        write_atomic(&path, &bytes)?;
        debug!(%owner, %chain_id, %run_id, "run snapshot archived");
        Ok(run_id)
    }

    fn list(&self, owner: &str, query: &RunLogQuery) -> StoreResult<Page<RunSnapshot>> {
        let mut files = match &query.chain_id {
            Some(chain_id) => collect_run_files(&self.layout.chain_runs_dir(owner, chain_id)?, 1),
            None => collect_run_files(&self.layout.runs_dir(owner)?, 2),
        };
        files.sort_by_key(|f| Reverse((f.stamp, f.name.clone())));

        let total = files.len();
        let mut items = Vec::new();
        for file in query.pagination.slice(files) {
            match Self::read_snapshot(&file.path) {
                Ok(Some(snapshot)) => items.push(snapshot),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "skipping unparsable run log")
                }
            }
        }
        Ok(Page::new(items, total, query.pagination))
    }

    fn get(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<RunSnapshot> {
        let path = self.layout.run_file(owner, chain_id, run_id)?;
        Self::read_snapshot(&path)?
            .ok_or_else(|| StoreError::NotFound(format!("run {owner}/{chain_id}/{run_id}")))
    }

    fn delete(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<()> {
        let path = self.layout.run_file(owner, chain_id, run_id)?;
        if !remove_optional(&path)? {
            return Err(StoreError::NotFound(format!("run {owner}/{chain_id}/{run_id}")));
        }
        Ok(())
    }

    fn delete_by_chain_id(&self, owner: &str, chain_id: &str) -> StoreResult<usize> {
        let dir = self.layout.chain_runs_dir(owner, chain_id)?;
        let removed = collect_run_files(&dir, 1).len();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        }
        info!(%owner, %chain_id, removed, "run logs removed");
        Ok(removed)
    }
}

// ── Relational backend ────────────────────────────────────────────

const RUN_COLUMNS: &str =
    "run_id, start_ts, end_ts, node_log, additional_info, rule_chain_info, metadata";

#[derive(Clone)]
pub struct SqlRunLogs {
    client: SqlClient,
}

impl SqlRunLogs {
    pub fn new(client: SqlClient) -> Self {
        Self { client }
    }
}

/// Raw row; decoded outside the statement so a bad field reports as
/// `Deserialize` rather than as a SQL error.
struct RunRow {
    run_id: String,
    start_ts: TimestampMs,
    end_ts: TimestampMs,
    node_log: String,
    additional_info: String,
    rule_chain_info: String,
    metadata: String,
}

fn run_row(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        start_ts: row.get(1)?,
        end_ts: row.get(2)?,
        node_log: row.get(3)?,
        additional_info: row.get(4)?,
        rule_chain_info: row.get(5)?,
        metadata: row.get(6)?,
    })
}

fn decode_field<T: serde::de::DeserializeOwned>(field: &str, raw: &str) -> StoreResult<T> {
    serde_json::from_str(raw).map_err(|e| StoreError::Deserialize(format!("{field}: {e}")))
}

impl RunRow {
    fn decode(self) -> StoreResult<RunSnapshot> {
        Ok(RunSnapshot {
            logs: decode_field("node_log", &self.node_log)?,
            additional_info: decode_field("additional_info", &self.additional_info)?,
            rule_chain: decode_field("rule_chain_info", &self.rule_chain_info)?,
            metadata: decode_field("metadata", &self.metadata)?,
            id: self.run_id,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
        })
    }
}

fn encode_field<T: serde::Serialize>(field: &str, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialize(format!("{field}: {e}")))
}

impl RunLogStore for SqlRunLogs {
    fn save(&self, owner: &str, chain_id: &str, snapshot: &RunSnapshot) -> StoreResult<String> {
        require_run_id(snapshot)?;
        let node_log = encode_field("node_log", &snapshot.logs)?;
        let additional_info = encode_field("additional_info", &snapshot.additional_info)?;
        let rule_chain_info = encode_field("rule_chain_info", &snapshot.rule_chain)?;
        let metadata = encode_field("metadata", &snapshot.metadata)?;
        let now = now_ms();

        let conn = self.client.lock()?;
        conn.execute(
            "INSERT INTO run_logs (user_name, run_id, chain_id, chain_name, node_log, \
               additional_info, rule_chain_info, metadata, start_ts, end_ts, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                owner,
                snapshot.id,
                chain_id,
                snapshot.chain_name(),
                node_log,
                additional_info,
                rule_chain_info,
                metadata,
                snapshot.start_ts,
                snapshot.end_ts,
                now
            ],
        )?;
        debug!(%owner, %chain_id, run_id = %snapshot.id, "run snapshot archived");
        Ok(snapshot.id.clone())
    }

    fn list(&self, owner: &str, query: &RunLogQuery) -> StoreResult<Page<RunSnapshot>> {
        let mut clauses = vec!["user_name = ?"];
        let mut values = vec![Value::Text(owner.to_string())];
        if let Some(chain_id) = query.chain_id.as_deref().filter(|c| !c.is_empty()) {
            clauses.push("chain_id = ?");
            values.push(Value::Text(chain_id.to_string()));
        }
        if let Some(start) = query.start_ms {
            clauses.push("created_at >= ?");
            values.push(Value::Integer(start));
        }
        if let Some(end) = query.end_ms {
            clauses.push("created_at <= ?");
            values.push(Value::Integer(end));
        }
        let predicate = clauses.join(" AND ");

        let rows = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM {RUN_LOGS} WHERE {predicate} \
                 ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let page_params = values.iter().cloned().chain(limit_offset(query.pagination));
            let rows = stmt.query_map(params_from_iter(page_params), run_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let total: i64 = {
            let conn = self.client.lock()?;
            let sql = format!("SELECT COUNT(*) FROM {RUN_LOGS} WHERE {predicate}");
            conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let run_id = row.run_id.clone();
            match row.decode() {
                Ok(snapshot) => items.push(snapshot),
                Err(e) => warn!(%owner, %run_id, error = %e, "skipping undecodable run log"),
            }
        }
        Ok(Page::new(items, total as usize, query.pagination))
    }

    fn get(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<RunSnapshot> {
        let row = {
            let conn = self.client.lock()?;
            let sql = format!(
                "SELECT {RUN_COLUMNS} FROM {RUN_LOGS} \
                 WHERE user_name = ?1 AND chain_id = ?2 AND run_id = ?3 \
                 ORDER BY id DESC LIMIT 1"
            );
            conn.query_row(&sql, params![owner, chain_id, run_id], run_row)
                .optional()?
        };
        row.ok_or_else(|| StoreError::NotFound(format!("run {owner}/{chain_id}/{run_id}")))?
            .decode()
    }

    fn delete(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<()> {
        let conn = self.client.lock()?;
        let deleted = conn.execute(
            "DELETE FROM run_logs WHERE user_name = ?1 AND chain_id = ?2 AND run_id = ?3",
            params![owner, chain_id, run_id],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("run {owner}/{chain_id}/{run_id}")));
        }
        Ok(())
    }

    fn delete_by_chain_id(&self, owner: &str, chain_id: &str) -> StoreResult<usize> {
        let conn = self.client.lock()?;
        let removed = conn.execute(
            "DELETE FROM run_logs WHERE user_name = ?1 AND chain_id = ?2",
            params![owner, chain_id],
        )?;
        info!(%owner, %chain_id, removed, "run logs removed");
        Ok(removed)
    }
}

// ── Archive ───────────────────────────────────────────────────────

/// Entry point used by the execution engine when a run completes, and by
/// the gateway when a chain is deleted.
#[derive(Clone)]
pub struct RunLogArchive {
    store: Arc<dyn RunLogStore>,
}

impl RunLogArchive {
    pub fn new(store: Arc<dyn RunLogStore>) -> Self {
        Self { store }
    }

    /// Archive a finished run. The chain id comes from the run context.
    pub fn save(
        &self,
        owner: &str,
        ctx: &dyn RunContext,
        snapshot: &RunSnapshot,
    ) -> StoreResult<String> {
        let chain_id = ctx.chain_id();
        if chain_id.is_empty() {
            return Err(StoreError::Validation("run context has no chain id".into()));
        }
        self.store.save(owner, chain_id, snapshot)
    }

    pub fn list(&self, owner: &str, query: &RunLogQuery) -> StoreResult<Page<RunSnapshot>> {
        self.store.list(owner, query)
    }

    pub fn get(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<RunSnapshot> {
        self.store.get(owner, chain_id, run_id)
    }

    pub fn delete(&self, owner: &str, chain_id: &str, run_id: &str) -> StoreResult<()> {
        self.store.delete(owner, chain_id, run_id)
    }

    pub fn delete_by_chain_id(&self, owner: &str, chain_id: &str) -> StoreResult<usize> {
        self.store.delete_by_chain_id(owner, chain_id)
    }
}
