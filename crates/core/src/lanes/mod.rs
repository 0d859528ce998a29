//! Per-agent worktree lanes and the run's integration worktree.
//!
//! Each agent gets its own branch and linked worktree, forked from the
//! integration branch at creation time. Lanes are created on first use and
//! cached for the life of the run. The integration worktree is the one
//! shared resource; merges into it go through [`LaneManager::process_merge_queue`],
//! which holds an async guard for the whole drain.

mod slug;

pub use slug::{MAX_SLUG_LEN, agent_slug};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{fs as weft_fs, git};
use crate::config::{Config, IdentityConfig};
use crate::domain::{Emitter, MergeRef, RunEvent};
use crate::merge_queue::{self, MergeQueue, MergeReport, MergeTarget};

const INTEGRATION_DIR: &str = ".integration";

#[derive(Debug, Error)]
pub enum LaneError {
  #[error("not a git repository: {0}")]
  NotARepository(PathBuf),
  #[error(transparent)]
  Git(#[from] git::GitError),
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("agent `{agent_id}` maps to slug `{slug}` already used by agent `{existing}`")]
  SlugCollision {
    agent_id: String,
    slug: String,
    existing: String,
  },
  #[error("no lane for agent `{0}`")]
  UnknownLane(String),
  #[error("run is cancelled")]
  Cancelled,
  #[error("lanes are not initialized; call init first")]
  NotInitialized,
}

pub type Result<T> = std::result::Result<T, LaneError>;

/// Everything a run's lanes need to know about the repository.
#[derive(Debug, Clone)]
pub struct LaneConfig {
  pub repo_root: PathBuf,
  pub worktrees_root: PathBuf,
  pub run_id: String,
  pub namespace: String,
  pub base_branch: String,
  pub integration_branch: String,
  pub identity: IdentityConfig,
  pub fetch_on_init: bool,
  pub required_checks: Vec<String>,
  pub check_timeout: Duration,
}

impl LaneConfig {
  pub fn new(repo_root: &Path, run_id: &str, cfg: &Config) -> Self {
    Self {
      repo_root: repo_root.to_path_buf(),
      worktrees_root: weft_fs::worktrees_dir(repo_root),
      run_id: run_id.to_string(),
      namespace: cfg.namespace.clone(),
      base_branch: cfg.base_branch.clone(),
      integration_branch: integration_branch_name(&cfg.namespace, run_id),
      identity: cfg.identity.clone(),
      fetch_on_init: cfg.fetch_on_init,
      required_checks: cfg.required_checks.clone(),
      check_timeout: Duration::from_secs(cfg.check_timeout_secs),
    }
  }

  pub fn run_dir(&self) -> PathBuf {
    self.worktrees_root.join(&self.run_id)
  }

  pub fn integration_path(&self) -> PathBuf {
    self.run_dir().join(INTEGRATION_DIR)
  }

  pub fn lane_branch(&self, slug: &str) -> String {
    format!("{}/{}/{}", self.namespace, self.run_id, slug)
  }
}

/// Default integration branch for a run. Kept outside `<namespace>/<run_id>/` so it
/// never clashes with a lane branch.
pub fn integration_branch_name(namespace: &str, run_id: &str) -> String {
  format!("{namespace}/integration/{run_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
  pub agent_id: String,
  pub slug: String,
  pub branch: String,
  pub path: PathBuf,
}

pub struct LaneManager {
  cfg: LaneConfig,
  emitter: Arc<dyn Emitter>,
  lanes: tokio::sync::Mutex<HashMap<String, Lane>>,
  queue: parking_lot::Mutex<MergeQueue>,
  integration: tokio::sync::Mutex<()>,
  initialized: AtomicBool,
  cancelled: Arc<AtomicBool>,
}

impl LaneManager {
  pub fn new(cfg: LaneConfig, emitter: Arc<dyn Emitter>, cancelled: Arc<AtomicBool>) -> Self {
    Self {
      cfg,
      emitter,
      lanes: tokio::sync::Mutex::new(HashMap::new()),
      queue: parking_lot::Mutex::new(MergeQueue::default()),
      integration: tokio::sync::Mutex::new(()),
      initialized: AtomicBool::new(false),
      cancelled,
    }
  }

  pub fn config(&self) -> &LaneConfig {
    &self.cfg
  }

  pub fn integration_branch(&self) -> &str {
    &self.cfg.integration_branch
  }

  /// Prepare the integration worktree, forcing its branch to the base branch tip.
  /// Reuses a worktree left over from an earlier attempt when possible.
  pub async fn init(&self) -> Result<()> {
    let root = &self.cfg.repo_root;
    if !git::is_repository(root) {
      return Err(LaneError::NotARepository(root.clone()));
    }
    std::fs::create_dir_all(self.cfg.run_dir())?;

    if self.cfg.fetch_on_init
      && let Err(err) = git::git_env(&["fetch", "--all", "--prune"], root, &self.git_env()).await
    {
      warn!(event = "lanes_fetch_failed", run_id = %self.cfg.run_id, error = %err);
    }

    let tip = {
      let repo = git2::Repository::open(root).map_err(git::GitError::from)?;
      git::resolve_base_branch_tip(&repo, &self.cfg.base_branch)?.to_string()
    };

    let _guard = self.integration.lock().await;
    let path = self.cfg.integration_path();
    let branch = &self.cfg.integration_branch;
    let reused = path.exists() && repoint(&path, branch, &tip).await;
    if !reused {
      if path.exists() {
        let _ = git::remove_worktree(root, &path).await;
      }
      git::prune_worktrees(root).await?;
      git::force_branch(root, branch, &tip).await?;
      git::add_worktree(root, &path, branch).await?;
    }
    self.initialized.store(true, Ordering::SeqCst);
    info!(
      event = "lanes_initialized",
      run_id = %self.cfg.run_id,
      integration_branch = %branch,
      base = %self.cfg.base_branch,
      reused,
    );
    Ok(())
  }

  /// Lane for `agent_id`, created on first call.
  pub async fn ensure_agent_worktree(&self, agent_id: &str) -> Result<Lane> {
    self.ensure_active()?;
    let mut lanes = self.lanes.lock().await;
    if let Some(lane) = lanes.get(agent_id) {
      return Ok(lane.clone());
    }
    let slug = agent_slug(agent_id);
    if let Some(existing) = lanes.values().find(|l| l.slug == slug) {
      return Err(LaneError::SlugCollision {
        agent_id: agent_id.to_string(),
        slug,
        existing: existing.agent_id.clone(),
      });
    }

    let root = &self.cfg.repo_root;
    let tip = git::rev_parse(root, &format!("refs/heads/{}", self.cfg.integration_branch)).await?;
    let branch = self.cfg.lane_branch(&slug);
    let path = self.cfg.run_dir().join(&slug);
    if path.exists() {
      let _ = git::remove_worktree(root, &path).await;
    }
    git::force_branch(root, &branch, &tip).await?;
    git::add_worktree(root, &path, &branch).await?;

    let lane = Lane {
      agent_id: agent_id.to_string(),
      slug,
      branch,
      path,
    };
    lanes.insert(agent_id.to_string(), lane.clone());
    drop(lanes);
    debug!(event = "lane_created", run_id = %self.cfg.run_id, agent_id, branch = %lane.branch);
    self.emitter.emit(RunEvent::WorktreeCreated {
      agent_id: lane.agent_id.clone(),
      branch: lane.branch.clone(),
      path: lane.path.display().to_string(),
    });
    Ok(lane)
  }

  pub async fn lane(&self, agent_id: &str) -> Result<Lane> {
    self
      .lanes
      .lock()
      .await
      .get(agent_id)
      .cloned()
      .ok_or_else(|| LaneError::UnknownLane(agent_id.to_string()))
  }

  pub async fn lanes(&self) -> Vec<Lane> {
    let mut lanes: Vec<Lane> = self.lanes.lock().await.values().cloned().collect();
    lanes.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    lanes
  }

  pub async fn lane_count(&self) -> usize {
    self.lanes.lock().await.len()
  }

  /// Modified and untracked paths in the agent's lane.
  pub async fn touched_files(&self, agent_id: &str) -> Result<Vec<String>> {
    let lane = self.lane(agent_id).await?;
    Ok(git::touched_files(&lane.path).await?)
  }

  /// Stage everything in the lane and commit. Returns `None` without emitting anything
  /// when there was nothing to commit.
  pub async fn commit_all(&self, agent_id: &str, message: &str) -> Result<Option<String>> {
    self.ensure_active()?;
    let lane = self.lane(agent_id).await?;
    git::git(&["add", "-A"], &lane.path).await?;
    let files = git::staged_files(&lane.path).await?;
    if files.is_empty() {
      debug!(event = "lane_commit_noop", agent_id);
      return Ok(None);
    }
    git::git_env(&["commit", "--quiet", "-m", message], &lane.path, &self.git_env()).await?;
    let hash = git::rev_parse(&lane.path, "HEAD").await?;
    info!(event = "lane_commit", agent_id, hash = %hash, files = files.len());

    self.emitter.emit(RunEvent::FilesTouched {
      agent_id: agent_id.to_string(),
      branch: lane.branch.clone(),
      files: files.clone(),
    });
    self.emitter.emit(RunEvent::Commit {
      agent_id: agent_id.to_string(),
      branch: lane.branch,
      hash: hash.clone(),
      message: message.to_string(),
      files,
    });
    Ok(Some(hash))
  }

  pub fn enqueue_merge(&self, from_branch: &str, into_branch: &str, agent_id: Option<&str>) {
    let item = MergeRef {
      from_branch: from_branch.to_string(),
      into_branch: into_branch.to_string(),
      agent_id: agent_id.map(str::to_string),
    };
    self.queue.lock().push(item.clone());
    self.emitter.emit(RunEvent::MergeQueued(item));
  }

  pub fn queued(&self) -> Vec<MergeRef> {
    self.queue.lock().snapshot()
  }

  /// Drain the merge queue into the integration worktree. Concurrent callers wait.
  pub async fn process_merge_queue(&self) -> Result<MergeReport> {
    if !self.initialized.load(Ordering::SeqCst) {
      return Err(LaneError::NotInitialized);
    }
    let _guard = self.integration.lock().await;
    let path = self.cfg.integration_path();
    let env = self.git_env();
    let target = MergeTarget {
      worktree: &path,
      git_env: &env,
      branch: &self.cfg.integration_branch,
      checks: &self.cfg.required_checks,
      check_timeout: self.cfg.check_timeout,
    };
    Ok(merge_queue::drain(&self.queue, &target, &self.cancelled, self.emitter.as_ref()).await)
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// Remove every worktree of the run. Branches are kept. Failures are logged and do not
  /// stop the remaining removals. Safe to call repeatedly.
  pub async fn cleanup(&self) {
    let root = &self.cfg.repo_root;
    let lanes: Vec<Lane> = self.lanes.lock().await.drain().map(|(_, l)| l).collect();
    for lane in lanes {
      if let Err(err) = git::remove_worktree(root, &lane.path).await {
        warn!(event = "lane_cleanup_failed", agent_id = %lane.agent_id, error = %err);
      }
    }

    let _guard = self.integration.lock().await;
    let integration = self.cfg.integration_path();
    if let Err(err) = git::remove_worktree(root, &integration).await {
      warn!(event = "integration_cleanup_failed", run_id = %self.cfg.run_id, error = %err);
    }
    self.initialized.store(false, Ordering::SeqCst);
    if let Err(err) = git::prune_worktrees(root).await {
      warn!(event = "worktree_prune_failed", error = %err);
    }
    let _ = std::fs::remove_dir(self.cfg.run_dir());
    debug!(event = "lanes_cleaned", run_id = %self.cfg.run_id);
  }

  fn ensure_active(&self) -> Result<()> {
    if self.is_cancelled() {
      return Err(LaneError::Cancelled);
    }
    if !self.initialized.load(Ordering::SeqCst) {
      return Err(LaneError::NotInitialized);
    }
    Ok(())
  }

  fn git_env(&self) -> Vec<(&'static str, &str)> {
    let id = &self.cfg.identity;
    git::identity_env(&id.name, &id.email, id.ssh_command.as_deref())
  }
}

/// Point an existing integration worktree at `tip` on `branch`, discarding local state.
async fn repoint(path: &Path, branch: &str, tip: &str) -> bool {
  let _ = git::git_raw(&["merge", "--abort"], path).await;
  let steps: [&[&str]; 2] = [&["checkout", "--force", "-B", branch, tip], &["clean", "-fdq"]];
  for args in steps {
    if let Err(err) = git::git(args, path).await {
      debug!(event = "integration_repoint_failed", path = %path.display(), error = %err);
      return false;
    }
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn branch_and_path_naming() {
    let cfg = LaneConfig::new(Path::new("/repo"), "r1", &Config::default());
    assert_eq!(cfg.lane_branch("agent-a"), "weft/r1/agent-a");
    assert_eq!(cfg.integration_branch, "weft/integration/r1");
    assert_eq!(cfg.run_dir(), Path::new("/repo/.weft/worktrees/r1"));
    assert_eq!(
      cfg.integration_path(),
      Path::new("/repo/.weft/worktrees/r1/.integration")
    );
  }
}
