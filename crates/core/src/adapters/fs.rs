use std::fs;
use std::path::{Path, PathBuf};

/// Return path to the `.weft` folder inside the given project root
pub fn weft_dir(project_root: &Path) -> PathBuf {
  project_root.join(".weft")
}

/// Standard subpaths under `.weft`
pub fn logs_path(project_root: &Path) -> PathBuf {
  weft_dir(project_root).join("logs.jsonl")
}

pub fn ledger_path(project_root: &Path) -> PathBuf {
  weft_dir(project_root).join("ledger.db")
}

pub fn worktrees_dir(project_root: &Path) -> PathBuf {
  weft_dir(project_root).join("worktrees")
}

/// Directory holding every worktree of one run, as `worktrees/{run_id}`
pub fn run_worktrees_dir(project_root: &Path, run_id: &str) -> PathBuf {
  worktrees_dir(project_root).join(run_id)
}

/// Ensure the `.weft` layout exists (directories are created if missing)
pub fn ensure_layout(project_root: &Path) -> std::io::Result<()> {
  fs::create_dir_all(worktrees_dir(project_root))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn layout_paths() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    assert_eq!(weft_dir(root), root.join(".weft"));
    assert_eq!(logs_path(root), root.join(".weft/logs.jsonl"));
    assert_eq!(ledger_path(root), root.join(".weft/ledger.db"));
    assert_eq!(worktrees_dir(root), root.join(".weft/worktrees"));
    assert_eq!(run_worktrees_dir(root, "r1"), root.join(".weft/worktrees/r1"));
  }

  #[test]
  fn ensure_layout_creates_dirs() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    ensure_layout(root).unwrap();
    assert!(weft_dir(root).exists());
    assert!(worktrees_dir(root).exists());
  }
}
