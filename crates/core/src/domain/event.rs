use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::records::{ArtifactRecord, EvidenceRecord, ResultRecord, TaskRecord};
use super::run::RunStatus;

/// Identifies one queued merge: `from_branch` into `into_branch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRef {
  pub from_branch: String,
  pub into_branch: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
  Success,
  Conflict,
  Failed,
}

/// A required check that failed after an otherwise clean merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
  pub command: String,
  /// `None` when the check timed out or could not be spawned.
  pub exit_code: Option<i32>,
  pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResultPayload {
  #[serde(flatten)]
  pub merge: MergeRef,
  pub status: MergeStatus,
  #[serde(default)]
  pub conflicts: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub check: Option<CheckFailure>,
}

/// Every event the ledger accepts, tagged by its wire type string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RunEvent {
  #[serde(rename = "run.created")]
  RunCreated { objective: String },
  #[serde(rename = "run.status")]
  RunStatusChanged {
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
  #[serde(rename = "run.budget")]
  BudgetReported {
    #[serde(default)]
    tokens: u64,
    #[serde(default)]
    cost: f64,
  },
  #[serde(rename = "task.upserted")]
  TaskUpserted(TaskRecord),
  #[serde(rename = "result.recorded")]
  ResultRecorded(ResultRecord),
  #[serde(rename = "evidence.recorded")]
  EvidenceRecorded(EvidenceRecord),
  #[serde(rename = "artifact.recorded")]
  ArtifactRecorded(ArtifactRecord),
  #[serde(rename = "git.worktree.created")]
  WorktreeCreated {
    agent_id: String,
    branch: String,
    path: String,
  },
  #[serde(rename = "git.files.touched")]
  FilesTouched {
    agent_id: String,
    branch: String,
    files: Vec<String>,
  },
  #[serde(rename = "git.commit")]
  Commit {
    agent_id: String,
    branch: String,
    hash: String,
    message: String,
    files: Vec<String>,
  },
  #[serde(rename = "git.merge.queued")]
  MergeQueued(MergeRef),
  #[serde(rename = "git.merge.attempt")]
  MergeAttempt(MergeRef),
  #[serde(rename = "git.merge.result")]
  MergeResult(MergeResultPayload),
  #[serde(rename = "preview.started")]
  PreviewStarted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
  },
  #[serde(rename = "preview.stopped")]
  PreviewStopped {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
  },
}

/// Registry of event type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  RunCreated,
  RunStatus,
  RunBudget,
  TaskUpserted,
  ResultRecorded,
  EvidenceRecorded,
  ArtifactRecorded,
  WorktreeCreated,
  FilesTouched,
  Commit,
  MergeQueued,
  MergeAttempt,
  MergeResult,
  PreviewStarted,
  PreviewStopped,
}

impl EventKind {
  pub const ALL: [EventKind; 15] = [
    EventKind::RunCreated,
    EventKind::RunStatus,
    EventKind::RunBudget,
    EventKind::TaskUpserted,
    EventKind::ResultRecorded,
    EventKind::EvidenceRecorded,
    EventKind::ArtifactRecorded,
    EventKind::WorktreeCreated,
    EventKind::FilesTouched,
    EventKind::Commit,
    EventKind::MergeQueued,
    EventKind::MergeAttempt,
    EventKind::MergeResult,
    EventKind::PreviewStarted,
    EventKind::PreviewStopped,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EventKind::RunCreated => "run.created",
      EventKind::RunStatus => "run.status",
      EventKind::RunBudget => "run.budget",
      EventKind::TaskUpserted => "task.upserted",
      EventKind::ResultRecorded => "result.recorded",
      EventKind::EvidenceRecorded => "evidence.recorded",
      EventKind::ArtifactRecorded => "artifact.recorded",
      EventKind::WorktreeCreated => "git.worktree.created",
      EventKind::FilesTouched => "git.files.touched",
      EventKind::Commit => "git.commit",
      EventKind::MergeQueued => "git.merge.queued",
      EventKind::MergeAttempt => "git.merge.attempt",
      EventKind::MergeResult => "git.merge.result",
      EventKind::PreviewStarted => "preview.started",
      EventKind::PreviewStopped => "preview.stopped",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.as_str() == s)
  }

  /// Kinds an agent may report through `run.report`. Everything else is
  /// emitted by the daemon itself.
  pub fn is_reportable(&self) -> bool {
    matches!(
      self,
      EventKind::RunBudget
        | EventKind::TaskUpserted
        | EventKind::ResultRecorded
        | EventKind::EvidenceRecorded
        | EventKind::ArtifactRecorded
    )
  }
}

impl RunEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      RunEvent::RunCreated { .. } => EventKind::RunCreated,
      RunEvent::RunStatusChanged { .. } => EventKind::RunStatus,
      RunEvent::BudgetReported { .. } => EventKind::RunBudget,
      RunEvent::TaskUpserted(_) => EventKind::TaskUpserted,
      RunEvent::ResultRecorded(_) => EventKind::ResultRecorded,
      RunEvent::EvidenceRecorded(_) => EventKind::EvidenceRecorded,
      RunEvent::ArtifactRecorded(_) => EventKind::ArtifactRecorded,
      RunEvent::WorktreeCreated { .. } => EventKind::WorktreeCreated,
      RunEvent::FilesTouched { .. } => EventKind::FilesTouched,
      RunEvent::Commit { .. } => EventKind::Commit,
      RunEvent::MergeQueued(_) => EventKind::MergeQueued,
      RunEvent::MergeAttempt(_) => EventKind::MergeAttempt,
      RunEvent::MergeResult(_) => EventKind::MergeResult,
      RunEvent::PreviewStarted { .. } => EventKind::PreviewStarted,
      RunEvent::PreviewStopped { .. } => EventKind::PreviewStopped,
    }
  }

  /// Split into the wire type string and the bare payload object.
  pub fn to_parts(&self) -> serde_json::Result<(&'static str, Value)> {
    let mut value = serde_json::to_value(self)?;
    let payload = value
      .get_mut("payload")
      .map(Value::take)
      .unwrap_or(Value::Object(Default::default()));
    Ok((self.kind().as_str(), payload))
  }

  /// Rebuild an event from its type string and payload.
  pub fn from_parts(kind: &str, payload: Value) -> serde_json::Result<Self> {
    serde_json::from_value(serde_json::json!({ "type": kind, "payload": payload }))
  }
}

/// Receives events produced by lane and merge operations.
pub trait Emitter: Send + Sync {
  fn emit(&self, event: RunEvent);
}

/// An event as persisted: keyed by `(run_id, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
  pub run_id: String,
  pub event_id: u64,
  pub created_at: DateTime<Utc>,
  pub event: RunEvent,
}
