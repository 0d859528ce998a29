use serde::{Deserialize, Serialize};

/// Lifecycle shared by tasks, results, evidence and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl RecordStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecordStatus::Pending => "pending",
      RecordStatus::Running => "running",
      RecordStatus::Succeeded => "succeeded",
      RecordStatus::Failed => "failed",
      RecordStatus::Cancelled => "cancelled",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s {
      "pending" => RecordStatus::Pending,
      "running" => RecordStatus::Running,
      "succeeded" => RecordStatus::Succeeded,
      "failed" => RecordStatus::Failed,
      "cancelled" => RecordStatus::Cancelled,
      _ => return None,
    })
  }
}

/// A discrete unit of agent work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
  pub id: String,
  pub title: String,
  pub status: RecordStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub agent_id: Option<String>,
}

/// Outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<String>,
  pub status: RecordStatus,
  pub summary: String,
}

/// Supporting proof: a diff, a log excerpt, test output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_id: Option<String>,
  pub kind: String,
  pub status: RecordStatus,
  pub body: String,
}

/// A produced build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub task_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result_id: Option<String>,
  pub name: String,
  pub path: String,
  pub status: RecordStatus,
}
