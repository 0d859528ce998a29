//! Run lifecycle: ties the ledger, the hub and a run's lanes together.
//!
//! Every state change of a run goes through its [`Recorder`], so the ledger
//! sees it first and live subscribers second. Active runs (those with lanes
//! in this process) are kept in memory; everything else is read back from
//! the ledger.

mod recorder;

pub use recorder::Recorder;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::{fs as weft_fs, git};
use crate::config::Config;
use crate::domain::{
  ArtifactRecord, EvidenceRecord, EventKind, MergeRef, ResultRecord, RunError, RunEvent,
  RunPackage, RunPolicy, RunSnapshot, RunStatus, StoredEvent, TaskRecord,
};
use crate::hub::{Frame, Hub};
use crate::lanes::{Lane, LaneConfig, LaneError, LaneManager};
use crate::ledger::{Ledger, LedgerError};
use crate::merge_queue::MergeReport;

pub const BUDGET_EXHAUSTED: &str = "budget exhausted";

#[derive(Debug, Error)]
pub enum OrchestratorError {
  #[error(transparent)]
  Ledger(#[from] LedgerError),
  #[error(transparent)]
  Lane(#[from] LaneError),
  #[error(transparent)]
  Run(#[from] RunError),
  #[error("run {run_id} is {} and has no active lanes", .status.as_str())]
  NotActive { run_id: String, status: RunStatus },
  #[error("run {run_id} already has {max} lanes")]
  LaneLimit { run_id: String, max: usize },
  #[error("event type `{0}` cannot be reported by agents")]
  NotReportable(String),
  #[error("cannot finish a run as {}", .0.as_str())]
  InvalidFinish(RunStatus),
  #[error("merge request needs `from_branch` or `agent_id`")]
  MissingMergeSource,
  #[error("preview already running for run {0}")]
  PreviewRunning(String),
  #[error("no preview running for run {0}")]
  PreviewNotRunning(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Everything known about a run: the snapshot, its derived records, and live lane state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDetails {
  pub run: RunSnapshot,
  pub tasks: Vec<TaskRecord>,
  pub results: Vec<ResultRecord>,
  pub evidence: Vec<EvidenceRecord>,
  pub artifacts: Vec<ArtifactRecord>,
  pub lanes: Vec<Lane>,
  pub queued: Vec<MergeRef>,
  pub integration_branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
  pub agent_id: Option<String>,
  pub from_branch: Option<String>,
  pub into_branch: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Budget {
  max_tokens: Option<u64>,
  max_cost: Option<f64>,
}

impl Budget {
  fn from_policy(policy: &RunPolicy) -> Self {
    Self {
      max_tokens: policy.max_tokens,
      max_cost: policy.max_cost,
    }
  }

  fn exhausted(&self, run: &RunSnapshot) -> bool {
    self.max_tokens.is_some_and(|max| run.tokens_used >= max)
      || self.max_cost.is_some_and(|max| run.cost_used >= max)
  }
}

struct ActiveRun {
  lanes: LaneManager,
  recorder: Arc<Recorder>,
  max_lanes: usize,
  budget: Budget,
  preview: Mutex<bool>,
  lane_gate: tokio::sync::Mutex<()>,
}

pub struct Orchestrator {
  repo_root: PathBuf,
  config: Config,
  ledger: Arc<Ledger>,
  hub: Hub,
  active: Mutex<HashMap<String, Arc<ActiveRun>>>,
}

impl Orchestrator {
  pub fn new(repo_root: &Path, config: Config, ledger: Arc<Ledger>, hub: Hub) -> Self {
    Self {
      repo_root: repo_root.to_path_buf(),
      config,
      ledger,
      hub,
      active: Mutex::new(HashMap::new()),
    }
  }

  pub fn hub(&self) -> &Hub {
    &self.hub
  }

  pub fn ledger(&self) -> &Ledger {
    &self.ledger
  }

  pub fn repo_root(&self) -> &Path {
    &self.repo_root
  }

  pub fn active_runs(&self) -> usize {
    self.active.lock().len()
  }

  /// Create a run, prepare its integration worktree and any lanes named in the package,
  /// and mark it running. A setup failure marks the run failed and is returned.
  pub async fn submit(&self, package: Value) -> Result<RunSnapshot> {
    let pkg = RunPackage::from_value(&package)?;
    let max_lanes = pkg
      .policy
      .max_lanes
      .map_or(self.config.max_lanes, |m| m.min(self.config.max_lanes));
    if pkg.agents.len() > max_lanes {
      return Err(
        RunError::InvalidPackage(format!(
          "{} agents requested but at most {max_lanes} lanes are allowed",
          pkg.agents.len()
        ))
        .into(),
      );
    }

    let run = self.ledger.create_run(&package)?;
    let recorder = Arc::new(Recorder::new(&run.id, self.ledger.clone(), self.hub.clone()));
    recorder.record(
      &RunEvent::RunCreated {
        objective: pkg.objective.clone(),
      },
      None,
    )?;

    let lanes = LaneManager::new(
      self.lane_config(&run.id, &pkg.policy),
      recorder.clone(),
      Arc::new(AtomicBool::new(false)),
    );
    let active = Arc::new(ActiveRun {
      lanes,
      recorder,
      max_lanes,
      budget: Budget::from_policy(&pkg.policy),
      preview: Mutex::new(false),
      lane_gate: tokio::sync::Mutex::new(()),
    });

    if let Err(err) = self.start(&active, &pkg.agents).await {
      warn!(event = "run_setup_failed", run_id = %run.id, error = %err);
      active.lanes.cleanup().await;
      self.set_status(&active.recorder, RunStatus::Failed, Some(err.to_string()))?;
      return Err(err);
    }
    self.active.lock().insert(run.id.clone(), active);
    info!(event = "run_started", run_id = %run.id, agents = pkg.agents.len());
    Ok(self.ledger.run(&run.id)?)
  }

  async fn start(&self, active: &ActiveRun, agents: &[String]) -> Result<()> {
    active.lanes.init().await?;
    self.set_status(&active.recorder, RunStatus::Running, None)?;
    for agent_id in agents {
      active.lanes.ensure_agent_worktree(agent_id).await?;
    }
    Ok(())
  }

  fn lane_config(&self, run_id: &str, policy: &RunPolicy) -> LaneConfig {
    let mut cfg = LaneConfig::new(&self.repo_root, run_id, &self.config);
    if let Some(base) = &policy.base_branch {
      cfg.base_branch = base.clone();
    }
    if let Some(branch) = &policy.integration_branch {
      cfg.integration_branch = branch.clone();
    }
    if let Some(checks) = &policy.required_checks {
      cfg.required_checks = checks.clone();
    }
    cfg
  }

  fn set_status(
    &self,
    recorder: &Recorder,
    status: RunStatus,
    reason: Option<String>,
  ) -> Result<StoredEvent> {
    Ok(recorder.record(&RunEvent::RunStatusChanged { status, reason }, None)?)
  }

  fn active(&self, run_id: &str) -> Result<Arc<ActiveRun>> {
    let active = self.active.lock().get(run_id).cloned();
    active.ok_or_else(|| self.inactive(run_id))
  }

  fn inactive(&self, run_id: &str) -> OrchestratorError {
    match self.ledger.run(run_id) {
      Ok(run) => OrchestratorError::NotActive {
        run_id: run_id.to_string(),
        status: run.status,
      },
      Err(err) => err.into(),
    }
  }

  pub fn run(&self, run_id: &str) -> Result<RunSnapshot> {
    Ok(self.ledger.run(run_id)?)
  }

  pub fn runs(&self) -> Result<Vec<RunSnapshot>> {
    Ok(self.ledger.runs()?)
  }

  pub async fn details(&self, run_id: &str) -> Result<RunDetails> {
    let run = self.ledger.run(run_id)?;
    let active = self.active.lock().get(run_id).cloned();
    let (lanes, queued, integration_branch) = match active {
      Some(active) => (
        active.lanes.lanes().await,
        active.lanes.queued(),
        Some(active.lanes.integration_branch().to_string()),
      ),
      None => (Vec::new(), Vec::new(), None),
    };
    Ok(RunDetails {
      tasks: self.ledger.tasks(run_id)?,
      results: self.ledger.results(run_id)?,
      evidence: self.ledger.evidence(run_id)?,
      artifacts: self.ledger.artifacts(run_id)?,
      run,
      lanes,
      queued,
      integration_branch,
    })
  }

  /// Stop the run: no new lane operation or merge starts, worktrees are removed.
  /// Cancelling an already cancelled run returns its snapshot unchanged.
  pub async fn cancel(&self, run_id: &str, reason: Option<String>) -> Result<RunSnapshot> {
    let run = self.ledger.run(run_id)?;
    if run.status == RunStatus::Cancelled {
      return Ok(run);
    }
    let active = self.active.lock().remove(run_id);
    match active {
      Some(active) => {
        active.lanes.cancel();
        self.set_status(
          &active.recorder,
          RunStatus::Cancelled,
          Some(reason.unwrap_or_else(|| "cancelled".to_string())),
        )?;
        active.lanes.cleanup().await;
      }
      None => {
        let recorder = Recorder::new(run_id, self.ledger.clone(), self.hub.clone());
        self.set_status(&recorder, RunStatus::Cancelled, reason)?;
      }
    }
    info!(event = "run_cancelled", run_id);
    Ok(self.ledger.run(run_id)?)
  }

  /// Mark the run completed or failed and remove its worktrees.
  pub async fn finish(
    &self,
    run_id: &str,
    status: RunStatus,
    reason: Option<String>,
  ) -> Result<RunSnapshot> {
    match status {
      RunStatus::Cancelled => return self.cancel(run_id, reason).await,
      RunStatus::Completed | RunStatus::Failed => {}
      other => return Err(OrchestratorError::InvalidFinish(other)),
    }
    let claimed = self.active.lock().remove(run_id);
    let Some(active) = claimed else {
      return Err(self.inactive(run_id));
    };
    if let Err(err) = self.set_status(&active.recorder, status, reason) {
      self.active.lock().insert(run_id.to_string(), active);
      return Err(err);
    }
    active.lanes.cleanup().await;
    info!(event = "run_finished", run_id, status = status.as_str());
    Ok(self.ledger.run(run_id)?)
  }

  /// Record an agent-reported event. Budget reports that reach the run's limits fail it.
  pub async fn report(
    &self,
    run_id: &str,
    event: RunEvent,
    seq: Option<u64>,
  ) -> Result<StoredEvent> {
    let kind = event.kind();
    if !kind.is_reportable() {
      return Err(OrchestratorError::NotReportable(kind.as_str().to_string()));
    }
    let active = self.active(run_id)?;
    let stored = active.recorder.record(&event, seq)?;
    if kind == EventKind::RunBudget {
      let run = self.ledger.run(run_id)?;
      if active.budget.exhausted(&run) {
        warn!(event = "run_budget_exhausted", run_id, tokens = run.tokens_used, cost = run.cost_used);
        // A concurrent report or finish may have ended the run first.
        match self
          .finish(run_id, RunStatus::Failed, Some(BUDGET_EXHAUSTED.to_string()))
          .await
        {
          Ok(_) | Err(OrchestratorError::NotActive { .. }) => {}
          Err(err) => return Err(err),
        }
      }
    }
    Ok(stored)
  }

  pub async fn ensure_lane(&self, run_id: &str, agent_id: &str) -> Result<Lane> {
    let active = self.active(run_id)?;
    let _gate = active.lane_gate.lock().await;
    if let Ok(lane) = active.lanes.lane(agent_id).await {
      return Ok(lane);
    }
    if active.lanes.lane_count().await >= active.max_lanes {
      return Err(OrchestratorError::LaneLimit {
        run_id: run_id.to_string(),
        max: active.max_lanes,
      });
    }
    Ok(active.lanes.ensure_agent_worktree(agent_id).await?)
  }

  pub async fn touched_files(&self, run_id: &str, agent_id: &str) -> Result<Vec<String>> {
    let active = self.active(run_id)?;
    Ok(active.lanes.touched_files(agent_id).await?)
  }

  pub async fn commit(&self, run_id: &str, agent_id: &str, message: &str) -> Result<Option<String>> {
    let active = self.active(run_id)?;
    Ok(active.lanes.commit_all(agent_id, message).await?)
  }

  /// Queue a merge. The source defaults to the agent's lane branch and the target to the
  /// run's integration branch.
  pub async fn enqueue_merge(&self, run_id: &str, req: MergeRequest) -> Result<MergeRef> {
    let active = self.active(run_id)?;
    let from_branch = match (&req.from_branch, &req.agent_id) {
      (Some(from), _) => from.clone(),
      (None, Some(agent_id)) => active.lanes.lane(agent_id).await?.branch,
      (None, None) => return Err(OrchestratorError::MissingMergeSource),
    };
    let into_branch = req
      .into_branch
      .unwrap_or_else(|| active.lanes.integration_branch().to_string());
    active
      .lanes
      .enqueue_merge(&from_branch, &into_branch, req.agent_id.as_deref());
    Ok(MergeRef {
      from_branch,
      into_branch,
      agent_id: req.agent_id,
    })
  }

  pub async fn process_merges(&self, run_id: &str) -> Result<MergeReport> {
    let active = self.active(run_id)?;
    Ok(active.lanes.process_merge_queue().await?)
  }

  /// Record that an externally managed preview started. Only one preview per run.
  pub fn preview_start(
    &self,
    run_id: &str,
    command: Option<String>,
    url: Option<String>,
  ) -> Result<StoredEvent> {
    let active = self.active(run_id)?;
    let mut running = active.preview.lock();
    if *running {
      return Err(OrchestratorError::PreviewRunning(run_id.to_string()));
    }
    let stored = active
      .recorder
      .record(&RunEvent::PreviewStarted { command, url }, None)?;
    *running = true;
    Ok(stored)
  }

  pub fn preview_stop(&self, run_id: &str, reason: Option<String>) -> Result<StoredEvent> {
    let active = self.active(run_id)?;
    let mut running = active.preview.lock();
    if !*running {
      return Err(OrchestratorError::PreviewNotRunning(run_id.to_string()));
    }
    let stored = active
      .recorder
      .record(&RunEvent::PreviewStopped { reason }, None)?;
    *running = false;
    Ok(stored)
  }

  pub fn replay(&self, run_id: &str, after: u64, limit: Option<usize>) -> Result<Vec<StoredEvent>> {
    Ok(self.ledger.events_after(run_id, after, limit)?)
  }

  /// Frames after `after`: whatever the ledger already holds, else whatever gets appended
  /// within `wait`, plus the pings seen meanwhile. Subscribes before reading the ledger so
  /// nothing appended in between is lost. A live event only wakes the call; the events
  /// returned are always re-read from the ledger, so concurrent recorders publishing out
  /// of order cannot make a caller skip an id.
  pub async fn tail(&self, run_id: &str, after: u64, wait: Duration) -> Result<Vec<Frame>> {
    let (subscription, mut rx) = self.hub.subscribe_channel(run_id);
    let stored = self.ledger.events_after(run_id, after, None)?;
    if !stored.is_empty() {
      drop(subscription);
      return Ok(stored_frames(&stored));
    }

    let mut pings = Vec::new();
    if let Ok(Some(first)) = tokio::time::timeout(wait, rx.recv()).await {
      let mut woke_by_event = matches!(first, Frame::Event { .. });
      if matches!(first, Frame::Ping { .. }) {
        pings.push(first);
      }
      while let Ok(frame) = rx.try_recv() {
        match frame {
          Frame::Ping { .. } => pings.push(frame),
          Frame::Event { .. } => woke_by_event = true,
        }
      }
      if !woke_by_event {
        drop(subscription);
        return Ok(pings);
      }
    }
    drop(subscription);

    let mut frames = stored_frames(&self.ledger.events_after(run_id, after, None)?);
    frames.extend(pings);
    Ok(frames)
  }

  /// Fail runs left pending or running by a previous daemon and remove their worktrees.
  /// Returns the ids of the runs that were marked.
  pub async fn recover_interrupted(&self) -> Result<Vec<String>> {
    let mut recovered = Vec::new();
    for run in self.ledger.runs()? {
      let is_active = self.active.lock().contains_key(&run.id);
      if run.status.is_terminal() || is_active {
        continue;
      }
      let recorder = Recorder::new(&run.id, self.ledger.clone(), self.hub.clone());
      self.set_status(
        &recorder,
        RunStatus::Failed,
        Some("interrupted: daemon restarted".to_string()),
      )?;
      remove_run_worktrees(&self.repo_root, &run.id).await;
      recovered.push(run.id);
    }
    if !recovered.is_empty() {
      info!(event = "runs_recovered", count = recovered.len());
    }
    Ok(recovered)
  }

  /// Clean up every active run's worktrees. Run statuses are left as they are.
  pub async fn shutdown(&self) {
    let active: Vec<Arc<ActiveRun>> = self.active.lock().drain().map(|(_, a)| a).collect();
    for run in active {
      run.lanes.cancel();
      run.lanes.cleanup().await;
    }
  }
}

fn stored_frames(stored: &[StoredEvent]) -> Vec<Frame> {
  stored.iter().filter_map(|ev| Frame::from_stored(ev).ok()).collect()
}

async fn remove_run_worktrees(repo_root: &Path, run_id: &str) {
  let dir = weft_fs::run_worktrees_dir(repo_root, run_id);
  let Ok(entries) = std::fs::read_dir(&dir) else {
    return;
  };
  for entry in entries.flatten() {
    let path = entry.path();
    if let Err(err) = git::remove_worktree(repo_root, &path).await {
      warn!(event = "recover_cleanup_failed", run_id, path = %path.display(), error = %err);
    }
  }
  let _ = git::prune_worktrees(repo_root).await;
  let _ = std::fs::remove_dir(&dir);
}
