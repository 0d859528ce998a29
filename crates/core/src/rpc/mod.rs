//! JSON-RPC request/response types shared by the daemon and the CLI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{RunSnapshot, RunStatus};
use crate::hub::Frame;
use crate::orchestrator::MergeRequest;

/// Stable JSON-RPC error codes.
pub mod codes {
  pub const INTERNAL: i32 = -32000;
  pub const RUN_NOT_FOUND: i32 = -32001;
  pub const NOT_A_REPOSITORY: i32 = -32002;
  pub const INVALID_TRANSITION: i32 = -32003;
  pub const RUN_NOT_ACTIVE: i32 = -32004;
  pub const LANE_LIMIT: i32 = -32005;
  pub const LANE: i32 = -32006;
  pub const NON_MONOTONIC: i32 = -32007;
  pub const INVALID_REQUEST: i32 = -32008;
  pub const PREVIEW: i32 = -32009;
  pub const CANCELLED: i32 = -32010;
}

/// Upper bound for `run.tail` long polls.
pub const MAX_TAIL_WAIT_MS: u64 = 30_000;

/// Response type for daemon.status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonStatus {
  pub version: String,
  pub pid: u32,
  pub socket_path: String,
  pub repo_root: String,
  pub active_runs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunCreateParams {
  /// Objective and policy, stored verbatim
  pub package: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunIdParams {
  pub run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCancelParams {
  pub run_id: String,
  #[serde(default)]
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFinishParams {
  pub run_id: String,
  pub status: RunStatus,
  #[serde(default)]
  pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReportParams {
  pub run_id: String,
  #[serde(rename = "type")]
  pub event_type: String,
  pub payload: Value,
  /// Caller-chosen event id; must exceed the run's latest id
  #[serde(default)]
  pub seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReportResult {
  pub event_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunListResponse {
  pub runs: Vec<RunSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunEventsParams {
  pub run_id: String,
  /// Return events with a greater id
  #[serde(default)]
  pub after: u64,
  #[serde(default)]
  pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunTailParams {
  pub run_id: String,
  #[serde(default)]
  pub after: u64,
  /// How long to wait for live frames when nothing is stored yet
  #[serde(default)]
  pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FramesResponse {
  pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneParams {
  pub run_id: String,
  pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneCommitParams {
  pub run_id: String,
  pub agent_id: String,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitResult {
  /// `None` when there was nothing to commit
  pub hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TouchedFilesResult {
  pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeEnqueueParams {
  pub run_id: String,
  #[serde(flatten)]
  pub request: MergeRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewStartParams {
  pub run_id: String,
  #[serde(default)]
  pub command: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewStopParams {
  pub run_id: String,
  #[serde(default)]
  pub reason: Option<String>,
}
