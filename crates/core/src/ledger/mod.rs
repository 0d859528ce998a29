//! Durable run event ledger backed by SQLite.
//!
//! The ledger is the system of record: every run ever submitted, its
//! append-only event log, and the task/result/evidence/artifact records
//! derived from those events. Events are numbered per run and the number
//! only ever grows. Derived records change only as a side effect of
//! [`Ledger::append`], inside the same transaction as the event row.

mod project;
mod schema;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::{
  ArtifactRecord, EvidenceRecord, RecordStatus, ResultRecord, RunEvent, RunSnapshot, RunStatus,
  StoredEvent, TaskRecord,
};

#[derive(Debug, Error)]
pub enum LedgerError {
  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("run not found: {0}")]
  RunNotFound(String),
  #[error("event id {requested} is not greater than latest event id {latest} for run {run_id}")]
  NonMonotonic {
    run_id: String,
    latest: u64,
    requested: u64,
  },
  #[error("event id {requested} for run {run_id} exceeds the largest storable id {}", i64::MAX)]
  IdOutOfRange { run_id: String, requested: u64 },
  #[error("invalid run transition {} -> {}", .from.as_str(), .to.as_str())]
  InvalidTransition { from: RunStatus, to: RunStatus },
  #[error("corrupt ledger row: {0}")]
  Corrupt(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

pub struct Ledger {
  conn: Mutex<Connection>,
}

/// Event ids are stored as SQLite INTEGER.
const MAX_EVENT_ID: u64 = i64::MAX as u64;

const RUN_COLUMNS: &str = "id, status, package, reason, latest_event_id, tokens_used, cost_used,
  created_at, updated_at, started_at, finished_at";

impl Ledger {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| LedgerError::Corrupt(format!("create {}: {e}", parent.display())))?;
    }
    let conn = Connection::open(path)?;
    schema::migrate(&conn)?;
    debug!(event = "ledger_opened", path = %path.display());
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    schema::migrate(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Store a new run with the submitted package kept as-is. Status starts at `pending`.
  pub fn create_run(&self, package: &Value) -> Result<RunSnapshot> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    {
      let conn = self.conn.lock();
      conn.execute(
        "INSERT INTO runs (id, status, package, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, RunStatus::Pending.as_str(), package.to_string(), now],
      )?;
    }
    self.run(&id)
  }

  /// Append one event. With `seq` the caller picks the id, which must exceed the run's
  /// latest id; otherwise the next id is assigned. Projection and counters are updated in
  /// the same transaction, so the event is durable once this returns.
  pub fn append(&self, run_id: &str, event: &RunEvent, seq: Option<u64>) -> Result<StoredEvent> {
    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;
    let latest: i64 = tx
      .query_row(
        "SELECT latest_event_id FROM runs WHERE id = ?1",
        params![run_id],
        |row| row.get(0),
      )
      .optional()?
      .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
    let latest = latest as u64;
    let event_id = match seq {
      Some(requested) if requested <= latest => {
        return Err(LedgerError::NonMonotonic {
          run_id: run_id.to_string(),
          latest,
          requested,
        });
      }
      Some(requested) if requested > MAX_EVENT_ID => {
        return Err(LedgerError::IdOutOfRange {
          run_id: run_id.to_string(),
          requested,
        });
      }
      Some(requested) => requested,
      None => match latest.checked_add(1).filter(|id| *id <= MAX_EVENT_ID) {
        Some(next) => next,
        None => {
          return Err(LedgerError::IdOutOfRange {
            run_id: run_id.to_string(),
            requested: latest.saturating_add(1),
          });
        }
      },
    };

    let created_at = Utc::now();
    let now = created_at.to_rfc3339();
    let (kind, payload) = event.to_parts()?;
    tx.execute(
      "INSERT INTO events (run_id, event_id, type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
      params![run_id, event_id as i64, kind, payload.to_string(), now],
    )?;
    project::apply(&tx, run_id, event, &now)?;
    tx.execute(
      "UPDATE runs SET latest_event_id = ?2, updated_at = ?3 WHERE id = ?1",
      params![run_id, event_id as i64, now],
    )?;
    tx.commit()?;

    debug!(event = "ledger_append", run_id, event_id, kind);
    Ok(StoredEvent {
      run_id: run_id.to_string(),
      event_id,
      created_at,
      event: event.clone(),
    })
  }

  pub fn run(&self, run_id: &str) -> Result<RunSnapshot> {
    let conn = self.conn.lock();
    conn
      .query_row(
        &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
        params![run_id],
        run_from_row,
      )
      .optional()?
      .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))
  }

  /// All runs, oldest first.
  pub fn runs(&self) -> Result<Vec<RunSnapshot>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at, rowid"
    ))?;
    let rows = stmt.query_map([], run_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
  }

  /// Events with id strictly greater than `after`, ascending. Used to resume a subscriber.
  pub fn events_after(
    &self,
    run_id: &str,
    after: u64,
    limit: Option<usize>,
  ) -> Result<Vec<StoredEvent>> {
    let conn = self.conn.lock();
    let exists: Option<i64> = conn
      .query_row("SELECT 1 FROM runs WHERE id = ?1", params![run_id], |row| row.get(0))
      .optional()?;
    if exists.is_none() {
      return Err(LedgerError::RunNotFound(run_id.to_string()));
    }
    let limit = limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1);
    let after = i64::try_from(after).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
      "SELECT run_id, event_id, type, payload, created_at FROM events
       WHERE run_id = ?1 AND event_id > ?2 ORDER BY event_id LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![run_id, after, limit], |row| {
      let kind: String = row.get(2)?;
      let payload: String = row.get(3)?;
      let payload: Value = serde_json::from_str(&payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
      let event = RunEvent::from_parts(&kind, payload)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
      Ok(StoredEvent {
        run_id: row.get(0)?,
        event_id: row.get::<_, i64>(1)? as u64,
        created_at: timestamp(row, 4)?,
        event,
      })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
  }

  pub fn tasks(&self, run_id: &str) -> Result<Vec<TaskRecord>> {
    self.collect(
      "SELECT id, title, status, agent_id FROM tasks WHERE run_id = ?1 ORDER BY rowid",
      run_id,
      |row| {
        Ok(TaskRecord {
          id: row.get(0)?,
          title: row.get(1)?,
          status: record_status(row, 2)?,
          agent_id: row.get(3)?,
        })
      },
    )
  }

  pub fn results(&self, run_id: &str) -> Result<Vec<ResultRecord>> {
    self.collect(
      "SELECT id, task_id, status, summary FROM results WHERE run_id = ?1 ORDER BY rowid",
      run_id,
      |row| {
        Ok(ResultRecord {
          id: row.get(0)?,
          task_id: row.get(1)?,
          status: record_status(row, 2)?,
          summary: row.get(3)?,
        })
      },
    )
  }

  pub fn evidence(&self, run_id: &str) -> Result<Vec<EvidenceRecord>> {
    self.collect(
      "SELECT id, task_id, result_id, kind, status, body FROM evidence
       WHERE run_id = ?1 ORDER BY rowid",
      run_id,
      |row| {
        Ok(EvidenceRecord {
          id: row.get(0)?,
          task_id: row.get(1)?,
          result_id: row.get(2)?,
          kind: row.get(3)?,
          status: record_status(row, 4)?,
          body: row.get(5)?,
        })
      },
    )
  }

  pub fn artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
    self.collect(
      "SELECT id, task_id, result_id, name, path, status FROM artifacts
       WHERE run_id = ?1 ORDER BY rowid",
      run_id,
      |row| {
        Ok(ArtifactRecord {
          id: row.get(0)?,
          task_id: row.get(1)?,
          result_id: row.get(2)?,
          name: row.get(3)?,
          path: row.get(4)?,
          status: record_status(row, 5)?,
        })
      },
    )
  }

  fn collect<T>(
    &self,
    sql: &str,
    run_id: &str,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
  ) -> Result<Vec<T>> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![run_id], map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
  }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  DateTime::parse_from_rfc3339(&raw)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| conversion_error(idx, format!("bad timestamp `{raw}`: {e}")))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let raw: Option<String> = row.get(idx)?;
  match raw {
    None => Ok(None),
    Some(_) => timestamp(row, idx).map(Some),
  }
}

fn record_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<RecordStatus> {
  let raw: String = row.get(idx)?;
  RecordStatus::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown status `{raw}`")))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunSnapshot> {
  let status: String = row.get(1)?;
  let status = RunStatus::parse(&status)
    .ok_or_else(|| conversion_error(1, format!("unknown run status `{status}`")))?;
  let package: String = row.get(2)?;
  let package: Value = serde_json::from_str(&package)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
  Ok(RunSnapshot {
    id: row.get(0)?,
    status,
    package,
    reason: row.get(3)?,
    latest_event_id: row.get::<_, i64>(4)? as u64,
    tokens_used: row.get::<_, i64>(5)? as u64,
    cost_used: row.get(6)?,
    created_at: timestamp(row, 7)?,
    updated_at: timestamp(row, 8)?,
    started_at: opt_timestamp(row, 9)?,
    finished_at: opt_timestamp(row, 10)?,
  })
}
