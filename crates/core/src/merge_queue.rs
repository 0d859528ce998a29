//! Serialized integration of lane branches.
//!
//! [`MergeQueue`] is plain scheduling state: a FIFO of merge intents that
//! lives only in memory. [`drain`] consumes it one item at a time against the
//! integration worktree and reports each outcome through an [`Emitter`]; the
//! durable record of what happened is the event log, never the queue.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapters::git;
use crate::adapters::process;
use crate::domain::{CheckFailure, Emitter, MergeRef, MergeResultPayload, MergeStatus, RunEvent};

const MAX_CHECK_OUTPUT: usize = 4000;

#[derive(Debug, Default)]
pub struct MergeQueue {
  items: VecDeque<MergeRef>,
}

impl MergeQueue {
  pub fn push(&mut self, item: MergeRef) {
    self.items.push_back(item);
  }

  pub fn pop(&mut self) -> Option<MergeRef> {
    self.items.pop_front()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn snapshot(&self) -> Vec<MergeRef> {
    self.items.iter().cloned().collect()
  }
}

/// Result of one drain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
  /// Final outcome per processed item, in queue order.
  pub outcomes: Vec<MergeResultPayload>,
  /// A non-success outcome stopped the drain.
  pub halted: bool,
  /// Cancellation stopped the drain before the queue was empty.
  pub cancelled: bool,
  /// Items still queued.
  pub remaining: Vec<MergeRef>,
}

/// Where merges land and what must pass afterwards.
pub struct MergeTarget<'a> {
  pub worktree: &'a Path,
  /// Identity for the merge commits, see [`git::identity_env`].
  pub git_env: &'a [(&'a str, &'a str)],
  pub branch: &'a str,
  pub checks: &'a [String],
  pub check_timeout: Duration,
}

/// Process queued items in order until the queue is empty, an item does not succeed, or
/// `cancelled` is set. The caller holds exclusive access to the integration worktree.
pub async fn drain(
  queue: &parking_lot::Mutex<MergeQueue>,
  target: &MergeTarget<'_>,
  cancelled: &AtomicBool,
  emitter: &dyn Emitter,
) -> MergeReport {
  let mut report = MergeReport::default();
  loop {
    if cancelled.load(Ordering::SeqCst) {
      let pending = queue.lock().len();
      report.cancelled = pending > 0;
      break;
    }
    let next = queue.lock().pop();
    let Some(item) = next else {
      break;
    };
    emitter.emit(RunEvent::MergeAttempt(item.clone()));
    let outcome = merge_one(item, target, emitter).await;
    let success = outcome.status == MergeStatus::Success;
    report.outcomes.push(outcome);
    if !success {
      report.halted = true;
      break;
    }
  }
  report.remaining = queue.lock().snapshot();
  report
}

async fn merge_one(item: MergeRef, target: &MergeTarget<'_>, emitter: &dyn Emitter) -> MergeResultPayload {
  let mut outcome = MergeResultPayload {
    merge: item,
    status: MergeStatus::Failed,
    conflicts: Vec::new(),
    error: None,
    check: None,
  };

  if outcome.merge.into_branch != target.branch {
    outcome.error = Some(format!(
      "`{}` is not the integration branch `{}`",
      outcome.merge.into_branch, target.branch
    ));
    emitter.emit(RunEvent::MergeResult(outcome.clone()));
    return outcome;
  }

  let from = outcome.merge.from_branch.clone();
  match git::git_raw_env(&["merge", "--no-ff", "--no-edit", &from], target.worktree, target.git_env).await {
    Ok(out) if out.success() => {
      outcome.status = MergeStatus::Success;
      info!(event = "merge_success", from = %from, into = target.branch);
    }
    Ok(out) => {
      outcome.conflicts = match git::unmerged_files(target.worktree).await {
        Ok(files) => files,
        Err(err) => {
          warn!(event = "merge_conflict_listing_failed", from = %from, error = %err);
          Vec::new()
        }
      };
      abort_merge(target.worktree).await;
      if !outcome.conflicts.is_empty() {
        outcome.status = MergeStatus::Conflict;
      }
      let detail = if out.stderr.trim().is_empty() { &out.stdout } else { &out.stderr };
      outcome.error = Some(detail.trim().to_string());
      warn!(event = "merge_failed", from = %from, status = ?outcome.status, conflicts = outcome.conflicts.len());
    }
    Err(err) => {
      outcome.error = Some(err.to_string());
      warn!(event = "merge_failed", from = %from, error = %err);
    }
  }
  emitter.emit(RunEvent::MergeResult(outcome.clone()));
  if outcome.status != MergeStatus::Success {
    return outcome;
  }

  for check in target.checks {
    if let Some(failure) = run_check(check, target).await {
      warn!(event = "merge_check_failed", from = %from, check = %check);
      outcome.status = MergeStatus::Failed;
      outcome.check = Some(failure);
      emitter.emit(RunEvent::MergeResult(outcome.clone()));
      break;
    }
  }
  outcome
}

async fn abort_merge(worktree: &Path) {
  let aborted = matches!(git::git_raw(&["merge", "--abort"], worktree).await, Ok(out) if out.success());
  if !aborted && let Err(err) = git::git(&["reset", "--hard", "HEAD"], worktree).await {
    warn!(event = "merge_reset_failed", worktree = %worktree.display(), error = %err);
  }
}

async fn run_check(command: &str, target: &MergeTarget<'_>) -> Option<CheckFailure> {
  match process::run_shell(command, target.worktree, target.check_timeout).await {
    Ok(out) if out.success() => None,
    Ok(out) => Some(CheckFailure {
      command: command.to_string(),
      exit_code: out.status.code(),
      output: tail(&format!("{}{}", out.stdout, out.stderr), MAX_CHECK_OUTPUT),
    }),
    Err(err) => Some(CheckFailure {
      command: command.to_string(),
      exit_code: None,
      output: err.to_string(),
    }),
  }
}

fn tail(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut start = s.len() - max;
  while !s.is_char_boundary(start) {
    start += 1;
  }
  s[start..].to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn queue_is_fifo() {
    let mut q = MergeQueue::default();
    for b in ["a", "b", "c"] {
      q.push(MergeRef {
        from_branch: b.into(),
        into_branch: "i".into(),
        agent_id: None,
      });
    }
    assert_eq!(q.len(), 3);
    assert_eq!(q.pop().unwrap().from_branch, "a");
    let rest: Vec<String> = q.snapshot().into_iter().map(|m| m.from_branch).collect();
    assert_eq!(rest, vec!["b", "c"]);
  }

  #[derive(Default)]
  struct Collected(parking_lot::Mutex<Vec<RunEvent>>);

  impl Emitter for Collected {
    fn emit(&self, event: RunEvent) {
      self.0.lock().push(event);
    }
  }

  #[tokio::test]
  async fn failed_merge_without_conflict_listing_is_failed() {
    let td = tempfile::tempdir().unwrap();
    let queue = parking_lot::Mutex::new(MergeQueue::default());
    for b in ["a", "b"] {
      queue.lock().push(MergeRef {
        from_branch: b.into(),
        into_branch: "i".into(),
        agent_id: None,
      });
    }
    let target = MergeTarget {
      worktree: td.path(),
      git_env: &[],
      branch: "i",
      checks: &[],
      check_timeout: Duration::from_secs(5),
    };
    let emitter = Collected::default();
    let report = drain(&queue, &target, &AtomicBool::new(false), &emitter).await;

    assert!(report.halted);
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, MergeStatus::Failed);
    assert!(outcome.conflicts.is_empty());
    assert!(outcome.error.as_deref().is_some_and(|e| !e.is_empty()));
    assert_eq!(report.remaining.len(), 1);
    assert!(matches!(
      emitter.0.lock().last(),
      Some(RunEvent::MergeResult(r)) if r.status == MergeStatus::Failed
    ));
  }

  #[test]
  fn tail_keeps_the_end_on_char_boundaries() {
    assert_eq!(tail("hello", 10), "hello");
    assert_eq!(tail("hello", 3), "llo");
    assert_eq!(tail("aé", 1), "");
  }
}
