use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::paths::{global_config_path, project_config_path};
use super::types::{Config, IdentityConfig, LogLevel, Result};
use super::validate::validate;

/// Load configuration by resolving the default global and project paths.
/// Project config overrides global; both override defaults.
pub fn load(project_root: Option<&Path>) -> Result<Config> {
  let global = global_config_path();
  let project = project_root.map(project_config_path);
  load_from_paths(global.as_deref(), project.as_deref())
}

/// Load configuration from explicit file paths (missing files are skipped).
pub fn load_from_paths(global: Option<&Path>, project: Option<&Path>) -> Result<Config> {
  let mut cfg = Config::default();

  for path in [global, project].into_iter().flatten() {
    if let Ok(s) = fs::read_to_string(path) {
      let partial: PartialConfig = toml::from_str(&s)?;
      cfg = partial.merge_over(cfg);
    }
  }

  validate(&cfg)?;

  Ok(cfg)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialIdentityConfig {
  pub name: Option<String>,
  pub email: Option<String>,
  pub ssh_command: Option<String>,
}

impl PartialIdentityConfig {
  fn merge_over(self, base: IdentityConfig) -> IdentityConfig {
    IdentityConfig {
      name: self.name.unwrap_or(base.name),
      email: self.email.unwrap_or(base.email),
      ssh_command: self.ssh_command.or(base.ssh_command),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct PartialConfig {
  pub log_level: Option<LogLevel>,
  pub namespace: Option<String>,
  pub base_branch: Option<String>,
  pub max_lanes: Option<usize>,
  pub required_checks: Option<Vec<String>>,
  pub check_timeout_secs: Option<u64>,
  pub keepalive_secs: Option<u64>,
  pub fetch_on_init: Option<bool>,
  pub identity: Option<PartialIdentityConfig>,
}

impl PartialConfig {
  fn merge_over(self, base: Config) -> Config {
    let PartialConfig {
      log_level,
      namespace,
      base_branch,
      max_lanes,
      required_checks,
      check_timeout_secs,
      keepalive_secs,
      fetch_on_init,
      identity,
    } = self;

    Config {
      log_level: log_level.unwrap_or(base.log_level),
      namespace: namespace.unwrap_or(base.namespace),
      base_branch: base_branch.unwrap_or(base.base_branch),
      max_lanes: max_lanes.unwrap_or(base.max_lanes),
      // Lists replace rather than extend, so a project can drop global checks
      required_checks: required_checks.unwrap_or(base.required_checks),
      check_timeout_secs: check_timeout_secs.unwrap_or(base.check_timeout_secs),
      keepalive_secs: keepalive_secs.unwrap_or(base.keepalive_secs),
      fetch_on_init: fetch_on_init.unwrap_or(base.fetch_on_init),
      identity: identity.unwrap_or_default().merge_over(base.identity),
    }
  }
}
