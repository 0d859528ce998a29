use std::path::Path;

use thiserror::Error;

use super::process::{self, CommandError, CommandOutput};

#[derive(Debug, Error)]
pub enum GitError {
  #[error(transparent)]
  Command(#[from] CommandError),
  #[error("git: {0}")]
  Git2(#[from] git2::Error),
  #[error("base branch `{0}` not found locally or on origin")]
  BaseBranchNotFound(String),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Run a git command in `cwd` and return trimmed stdout. Fails on non-zero exit.
pub async fn git(args: &[&str], cwd: &Path) -> Result<String> {
  let out = process::run_checked("git", args, cwd, &[]).await?;
  Ok(out.stdout.trim().to_string())
}

/// Run a git command without rejecting on a non-zero exit.
pub async fn git_raw(args: &[&str], cwd: &Path) -> Result<CommandOutput> {
  Ok(process::run("git", args, cwd, &[]).await?)
}

/// Like [`git`] with extra environment, e.g. from [`identity_env`].
pub async fn git_env(args: &[&str], cwd: &Path, env: &[(&str, &str)]) -> Result<String> {
  let out = process::run_checked("git", args, cwd, env).await?;
  Ok(out.stdout.trim().to_string())
}

pub async fn git_raw_env(args: &[&str], cwd: &Path, env: &[(&str, &str)]) -> Result<CommandOutput> {
  Ok(process::run("git", args, cwd, env).await?)
}

/// True if `path` is the root (or inside) of a git repository.
pub fn is_repository(path: &Path) -> bool {
  git2::Repository::open(path).is_ok()
}

/// Ensure that the base branch exists in the repository and return its HEAD Oid.
/// Tries local branch first, then `origin/<branch>` remote tracking ref.
pub fn resolve_base_branch_tip(repo: &git2::Repository, base_branch: &str) -> Result<git2::Oid> {
  for name in [
    format!("refs/heads/{base_branch}"),
    format!("refs/remotes/origin/{base_branch}"),
  ] {
    if let Ok(reference) = repo.find_reference(&name) {
      let commit = reference.peel_to_commit()?;
      return Ok(commit.id());
    }
  }
  Err(GitError::BaseBranchNotFound(base_branch.to_string()))
}

pub async fn rev_parse(cwd: &Path, rev: &str) -> Result<String> {
  git(&["rev-parse", "--verify", rev], cwd).await
}

/// Point `branch` at `commit`, creating it if necessary.
pub async fn force_branch(repo_root: &Path, branch: &str, commit: &str) -> Result<()> {
  git(&["branch", "--force", branch, commit], repo_root).await?;
  Ok(())
}

pub async fn add_worktree(repo_root: &Path, wt_path: &Path, branch: &str) -> Result<()> {
  let wt = wt_path.to_string_lossy();
  git(&["worktree", "prune"], repo_root).await?;
  git(&["worktree", "add", "--quiet", wt.as_ref(), branch], repo_root).await?;
  Ok(())
}

/// Remove a linked worktree directory. Returns whether it existed beforehand.
pub async fn remove_worktree(repo_root: &Path, wt_path: &Path) -> Result<bool> {
  if !wt_path.exists() {
    return Ok(false);
  }
  let wt = wt_path.to_string_lossy();
  if let Err(err) = git(&["worktree", "remove", "--force", wt.as_ref()], repo_root).await {
    let _ = git(&["worktree", "prune"], repo_root).await;
    return Err(err);
  }
  Ok(true)
}

pub async fn prune_worktrees(repo_root: &Path) -> Result<()> {
  git(&["worktree", "prune"], repo_root).await?;
  Ok(())
}

/// Unstaged modifications plus untracked (non-ignored) files, relative to `cwd`, sorted.
pub async fn touched_files(cwd: &Path) -> Result<Vec<String>> {
  let modified = git(&["diff", "--name-only"], cwd).await?;
  let untracked = git(&["ls-files", "--others", "--exclude-standard"], cwd).await?;
  let mut files: Vec<String> = modified
    .lines()
    .chain(untracked.lines())
    .filter(|l| !l.trim().is_empty())
    .map(str::to_string)
    .collect();
  files.sort();
  files.dedup();
  Ok(files)
}

pub async fn staged_files(cwd: &Path) -> Result<Vec<String>> {
  let out = git(&["diff", "--cached", "--name-only"], cwd).await?;
  Ok(lines(&out))
}

/// Paths with unresolved merge conflicts in the worktree at `cwd`.
pub async fn unmerged_files(cwd: &Path) -> Result<Vec<String>> {
  let out = git(&["diff", "--name-only", "--diff-filter=U"], cwd).await?;
  Ok(lines(&out))
}

/// Author, committer and SSH command for a single git invocation. Nothing is written
/// to the repository config, which linked worktrees share with the main checkout.
pub fn identity_env<'a>(
  name: &'a str,
  email: &'a str,
  ssh_command: Option<&'a str>,
) -> Vec<(&'static str, &'a str)> {
  let mut env = vec![
    ("GIT_AUTHOR_NAME", name),
    ("GIT_AUTHOR_EMAIL", email),
    ("GIT_COMMITTER_NAME", name),
    ("GIT_COMMITTER_EMAIL", email),
  ];
  if let Some(ssh) = ssh_command {
    env.push(("GIT_SSH_COMMAND", ssh));
  }
  env
}

fn lines(s: &str) -> Vec<String> {
  s.lines()
    .filter(|l| !l.trim().is_empty())
    .map(str::to_string)
    .collect()
}
