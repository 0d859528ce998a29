use std::path::Path;

use super::paths::project_config_path;
use super::types::Config;

/// Write a default project config if it does not exist yet. Returns whether a file was written.
pub fn write_default_project_config(project_root: &Path) -> std::io::Result<bool> {
  let path = project_config_path(project_root);
  if path.exists() {
    return Ok(false);
  }
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let cfg = Config::default();
  let mut s = toml::to_string_pretty(&cfg).unwrap_or_default();
  s.push_str(
    "# Pin an SSH key for fetches from the worktrees (still inside [identity]):\n# ssh_command = \"ssh -i ~/.ssh/weft\"\n",
  );
  std::fs::write(&path, s)?;
  Ok(true)
}
