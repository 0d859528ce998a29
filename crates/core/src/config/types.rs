use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Log level for the daemon and CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

/// Committer identity configured on every worktree a run creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
  pub name: String,
  pub email: String,
  /// Optional `core.sshCommand`, e.g. to pin a deploy key.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ssh_command: Option<String>,
}

impl Default for IdentityConfig {
  fn default() -> Self {
    Self {
      name: "weft".to_string(),
      email: "weft@localhost".to_string(),
      ssh_command: None,
    }
  }
}

/// Effective configuration after merging defaults, global, and project config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub log_level: LogLevel,
  /// First segment of every lane branch: `<namespace>/<run_id>/<agent>`
  pub namespace: String,
  /// Branch the integration branch is forced to at run start
  pub base_branch: String,
  /// Max concurrent lanes per run, unless the run policy lowers it
  pub max_lanes: usize,
  /// Shell commands run in the integration worktree after every successful merge
  pub required_checks: Vec<String>,
  /// Per-check timeout in seconds (defaults to 600)
  pub check_timeout_secs: u64,
  /// Interval of keep-alive pings to event subscribers (defaults to 15)
  pub keepalive_secs: u64,
  /// Run `git fetch --all --prune` when a run initializes its worktrees
  pub fetch_on_init: bool,
  pub identity: IdentityConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      namespace: "weft".to_string(),
      base_branch: "main".to_string(),
      max_lanes: 4,
      required_checks: Vec::new(),
      check_timeout_secs: 600,
      keepalive_secs: 15,
      fetch_on_init: true,
      identity: IdentityConfig::default(),
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("unsupported platform: no runtime or data directory available")]
  UnsupportedPlatform,
  #[error("invalid `{key}`: {reason}")]
  Invalid { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
