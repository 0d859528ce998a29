//! Layered TOML configuration: built-in defaults, then the global file, then
//! the project's `.weft/config.toml`.

mod load;
mod paths;
mod types;
mod validate;
mod write;

pub use load::{load, load_from_paths};
pub use paths::{global_config_path, project_config_path, resolve_socket_path};
pub use types::{Config, ConfigError, IdentityConfig, LogLevel, Result};
pub use write::write_default_project_config;
