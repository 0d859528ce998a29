use std::env;
use std::path::{Path, PathBuf};

use dirs::data_dir;
use dirs::runtime_dir;

use super::types::{ConfigError, Result};

/// Location of the global config file (~/.config/weft/config.toml)
pub fn global_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|p| p.join("weft").join("config.toml"))
}

/// Location of the project config file (./.weft/config.toml)
pub fn project_config_path(project_root: &Path) -> PathBuf {
  crate::adapters::fs::weft_dir(project_root).join("config.toml")
}

/// Resolve the socket path using WEFT_SOCKET or platform defaults.
pub fn resolve_socket_path() -> Result<PathBuf> {
  resolve_socket_path_for(env::var("WEFT_SOCKET").ok().map(PathBuf::from))
}

pub(crate) fn resolve_socket_path_for(env_socket: Option<PathBuf>) -> Result<PathBuf> {
  if let Some(val) = env_socket {
    return Ok(val);
  }
  // Prefer runtime_dir for ephemeral sockets; fall back to data_dir
  match runtime_dir().or(data_dir()) {
    Some(dir) => Ok(dir.join("weft.sock")),
    None => Err(ConfigError::UnsupportedPlatform),
  }
}
