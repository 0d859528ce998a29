use super::types::{Config, ConfigError, Result};

pub(super) fn validate(cfg: &Config) -> Result<()> {
  let ns = cfg.namespace.trim();
  if ns.is_empty() {
    return Err(invalid("namespace", "must not be empty"));
  }
  if !ns
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
  {
    return Err(invalid(
      "namespace",
      "only ASCII letters, digits, '-', '_' and '.' are allowed",
    ));
  }
  if cfg.base_branch.trim().is_empty() {
    return Err(invalid("base_branch", "must not be empty"));
  }
  if cfg.max_lanes == 0 {
    return Err(invalid("max_lanes", "must be at least 1"));
  }
  if cfg.check_timeout_secs == 0 {
    return Err(invalid("check_timeout_secs", "must be greater than zero"));
  }
  if cfg.keepalive_secs == 0 {
    return Err(invalid("keepalive_secs", "must be greater than zero"));
  }
  if cfg.required_checks.iter().any(|c| c.trim().is_empty()) {
    return Err(invalid("required_checks", "checks must not be empty strings"));
  }
  if cfg.identity.name.trim().is_empty() || cfg.identity.email.trim().is_empty() {
    return Err(invalid("identity", "name and email are required"));
  }
  Ok(())
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
  ConfigError::Invalid {
    key,
    reason: reason.to_string(),
  }
}
