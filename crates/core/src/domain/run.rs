use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Cancelled,
  Failed,
  Completed,
}

impl RunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Pending => "pending",
      RunStatus::Running => "running",
      RunStatus::Cancelled => "cancelled",
      RunStatus::Failed => "failed",
      RunStatus::Completed => "completed",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s {
      "pending" => RunStatus::Pending,
      "running" => RunStatus::Running,
      "cancelled" => RunStatus::Cancelled,
      "failed" => RunStatus::Failed,
      "completed" => RunStatus::Completed,
      _ => return None,
    })
  }

  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed
    )
  }

  pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    matches!(
      (from, to),
      (Pending, Running)
        | (Pending, Cancelled)
        | (Pending, Failed)
        | (Running, Completed)
        | (Running, Failed)
        | (Running, Cancelled)
    )
  }
}

#[derive(Debug, Error)]
pub enum RunError {
  #[error("invalid run package: {0}")]
  InvalidPackage(String),
}

/// Policy knobs a submitter may set per run. Unset fields fall back to config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
  pub max_lanes: Option<usize>,
  pub base_branch: Option<String>,
  pub integration_branch: Option<String>,
  pub required_checks: Option<Vec<String>>,
  pub max_tokens: Option<u64>,
  pub max_cost: Option<f64>,
}

/// The objective and policy an external caller submits. Stored verbatim by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPackage {
  pub objective: String,
  #[serde(default)]
  pub agents: Vec<String>,
  #[serde(default)]
  pub policy: RunPolicy,
}

impl RunPackage {
  pub fn from_value(value: &serde_json::Value) -> Result<Self, RunError> {
    let pkg: RunPackage = serde_json::from_value(value.clone())
      .map_err(|e| RunError::InvalidPackage(e.to_string()))?;
    if pkg.objective.trim().is_empty() {
      return Err(RunError::InvalidPackage("objective must not be empty".into()));
    }
    if pkg.policy.max_lanes == Some(0) {
      return Err(RunError::InvalidPackage("policy.max_lanes must be at least 1".into()));
    }
    Ok(pkg)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
  pub id: String,
  pub status: RunStatus,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub reason: Option<String>,
  pub latest_event_id: u64,
  pub tokens_used: u64,
  pub cost_used: f64,
  pub package: serde_json::Value,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn transitions_enforced() {
    use RunStatus::*;
    assert!(RunStatus::can_transition(Pending, Running));
    assert!(RunStatus::can_transition(Running, Completed));
    assert!(RunStatus::can_transition(Pending, Cancelled));
    assert!(!RunStatus::can_transition(Completed, Running));
    assert!(!RunStatus::can_transition(Cancelled, Failed));
    assert!(!RunStatus::can_transition(Running, Pending));
    for s in [Cancelled, Failed, Completed] {
      assert!(s.is_terminal());
    }
  }

  #[test]
  fn status_strings_round_trip() {
    use RunStatus::*;
    for s in [Pending, Running, Cancelled, Failed, Completed] {
      assert_eq!(RunStatus::parse(s.as_str()), Some(s));
    }
    assert_eq!(RunStatus::parse("bogus"), None);
  }

  #[test]
  fn package_defaults_policy() {
    let pkg = RunPackage::from_value(&json!({ "objective": "ship it" })).unwrap();
    assert_eq!(pkg.policy, RunPolicy::default());
    assert!(pkg.agents.is_empty());
  }

  #[test]
  fn package_requires_objective() {
    assert!(RunPackage::from_value(&json!({ "objective": "  " })).is_err());
    assert!(RunPackage::from_value(&json!({ "agents": ["a"] })).is_err());
    assert!(
      RunPackage::from_value(&json!({ "objective": "x", "policy": { "max_lanes": 0 } })).is_err()
    );
  }
}
