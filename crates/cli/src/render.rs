//! Plain-text rendering of runs and timeline entries. Colour is applied at print time.

use weft_core::domain::{MergeResultPayload, MergeStatus, RunEvent, RunSnapshot, RunStatus};
use weft_core::reducer::TimelineEntry;
use yansi::{Paint, Painted};

pub fn paint_status(status: RunStatus) -> Painted<&'static str> {
  let label = status.as_str();
  match status {
    RunStatus::Completed => label.green(),
    RunStatus::Failed => label.red(),
    RunStatus::Cancelled => label.yellow(),
    RunStatus::Running => label.cyan(),
    RunStatus::Pending => label.dim(),
  }
}

pub fn objective(run: &RunSnapshot) -> &str {
  run
    .package
    .get("objective")
    .and_then(|o| o.as_str())
    .unwrap_or("")
}

pub fn run_row(run: &RunSnapshot) -> String {
  format!(
    "{:<36} {:<10} {}",
    run.id,
    run.status.as_str(),
    objective(run)
  )
}

fn short(hash: &str) -> &str {
  hash.get(..8).unwrap_or(hash)
}

fn plural(n: usize, word: &str) -> String {
  if n == 1 {
    format!("{n} {word}")
  } else {
    format!("{n} {word}s")
  }
}

pub fn merge_outcome(r: &MergeResultPayload) -> String {
  let head = format!("{} -> {}", r.merge.from_branch, r.merge.into_branch);
  match (r.status, &r.check) {
    (MergeStatus::Success, _) => format!("{head}: merged"),
    (MergeStatus::Conflict, _) => format!("{head}: conflict in {}", r.conflicts.join(", ")),
    (MergeStatus::Failed, Some(check)) => format!("{head}: check `{}` failed", check.command),
    (MergeStatus::Failed, None) => format!(
      "{head}: failed ({})",
      r.error.as_deref().unwrap_or("unknown error")
    ),
  }
}

/// One-line human summary of an event; unknown or malformed payloads fall back to raw JSON.
pub fn describe(entry: &TimelineEntry) -> String {
  let Ok(event) = RunEvent::from_parts(&entry.event_type, entry.payload.clone()) else {
    return entry.payload.to_string();
  };
  match event {
    RunEvent::RunCreated { objective } => format!("created: {objective}"),
    RunEvent::RunStatusChanged { status, reason } => match reason {
      Some(reason) => format!("{} ({reason})", status.as_str()),
      None => status.as_str().to_string(),
    },
    RunEvent::BudgetReported { tokens, cost } => format!("+{tokens} tokens, +{cost:.4} cost"),
    RunEvent::TaskUpserted(t) => format!("task {} {}: {}", t.id, t.status.as_str(), t.title),
    RunEvent::ResultRecorded(r) => format!("result {} {}: {}", r.id, r.status.as_str(), r.summary),
    RunEvent::EvidenceRecorded(e) => format!("evidence {} ({}) {}", e.id, e.kind, e.status.as_str()),
    RunEvent::ArtifactRecorded(a) => format!("artifact {} at {}", a.name, a.path),
    RunEvent::WorktreeCreated { agent_id, branch, .. } => format!("{agent_id} on {branch}"),
    RunEvent::FilesTouched { agent_id, files, .. } => {
      format!("{agent_id} touched {}", plural(files.len(), "file"))
    }
    RunEvent::Commit {
      agent_id,
      hash,
      message,
      ..
    } => format!("{agent_id} {} {message}", short(&hash)),
    RunEvent::MergeQueued(m) | RunEvent::MergeAttempt(m) => {
      format!("{} -> {}", m.from_branch, m.into_branch)
    }
    RunEvent::MergeResult(r) => merge_outcome(&r),
    RunEvent::PreviewStarted { command, url } => {
      let target = url.or(command).unwrap_or_default();
      format!("preview {target}").trim_end().to_string()
    }
    RunEvent::PreviewStopped { reason } => match reason {
      Some(reason) => format!("preview stopped ({reason})"),
      None => "preview stopped".to_string(),
    },
  }
}

pub fn event_line(entry: &TimelineEntry) -> String {
  format!("{:>5}  {:<20} {}", entry.id, entry.event_type, describe(entry))
}
