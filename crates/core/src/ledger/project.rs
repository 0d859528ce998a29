//! Derived-record projection applied inside the append transaction.

use rusqlite::{OptionalExtension, Transaction, params};

use super::{LedgerError, Result};
use crate::domain::{RunEvent, RunStatus};

pub(super) fn apply(tx: &Transaction<'_>, run_id: &str, event: &RunEvent, now: &str) -> Result<()> {
  match event {
    RunEvent::RunStatusChanged { status, reason } => set_status(tx, run_id, *status, reason.as_deref(), now),
    RunEvent::BudgetReported { tokens, cost } => {
      tx.execute(
        "UPDATE runs SET tokens_used = tokens_used + ?2, cost_used = cost_used + ?3 WHERE id = ?1",
        params![run_id, i64::try_from(*tokens).unwrap_or(i64::MAX), cost],
      )?;
      Ok(())
    }
    RunEvent::TaskUpserted(task) => {
      tx.execute(
        "INSERT INTO tasks (run_id, id, title, status, agent_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(run_id, id) DO UPDATE SET
           title = excluded.title, status = excluded.status,
           agent_id = COALESCE(excluded.agent_id, tasks.agent_id), updated_at = excluded.updated_at",
        params![run_id, task.id, task.title, task.status.as_str(), task.agent_id, now],
      )?;
      Ok(())
    }
    RunEvent::ResultRecorded(result) => {
      tx.execute(
        "INSERT INTO results (run_id, id, task_id, status, summary, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(run_id, id) DO UPDATE SET
           task_id = excluded.task_id, status = excluded.status,
           summary = excluded.summary, updated_at = excluded.updated_at",
        params![run_id, result.id, result.task_id, result.status.as_str(), result.summary, now],
      )?;
      Ok(())
    }
    RunEvent::EvidenceRecorded(ev) => {
      tx.execute(
        "INSERT INTO evidence (run_id, id, task_id, result_id, kind, status, body, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(run_id, id) DO UPDATE SET
           task_id = excluded.task_id, result_id = excluded.result_id, kind = excluded.kind,
           status = excluded.status, body = excluded.body, updated_at = excluded.updated_at",
        params![run_id, ev.id, ev.task_id, ev.result_id, ev.kind, ev.status.as_str(), ev.body, now],
      )?;
      Ok(())
    }
    RunEvent::ArtifactRecorded(art) => {
      tx.execute(
        "INSERT INTO artifacts (run_id, id, task_id, result_id, name, path, status, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(run_id, id) DO UPDATE SET
           task_id = excluded.task_id, result_id = excluded.result_id, name = excluded.name,
           path = excluded.path, status = excluded.status, updated_at = excluded.updated_at",
        params![run_id, art.id, art.task_id, art.result_id, art.name, art.path, art.status.as_str(), now],
      )?;
      Ok(())
    }
    _ => Ok(()),
  }
}

fn set_status(
  tx: &Transaction<'_>,
  run_id: &str,
  to: RunStatus,
  reason: Option<&str>,
  now: &str,
) -> Result<()> {
  let current: String = tx
    .query_row("SELECT status FROM runs WHERE id = ?1", params![run_id], |row| row.get(0))
    .optional()?
    .ok_or_else(|| LedgerError::RunNotFound(run_id.to_string()))?;
  let from = RunStatus::parse(&current)
    .ok_or_else(|| LedgerError::Corrupt(format!("unknown run status `{current}`")))?;
  if !RunStatus::can_transition(from, to) {
    return Err(LedgerError::InvalidTransition { from, to });
  }
  tx.execute(
    "UPDATE runs SET status = ?2,
       reason = COALESCE(?3, reason),
       started_at = CASE WHEN ?2 = 'running' THEN ?4 ELSE started_at END,
       finished_at = CASE WHEN ?5 THEN ?4 ELSE finished_at END
     WHERE id = ?1",
    params![run_id, to.as_str(), reason, now, to.is_terminal()],
  )?;
  Ok(())
}
