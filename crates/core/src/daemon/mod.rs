//! The weft daemon: one orchestrator per repository, served as JSON-RPC over
//! a Unix domain socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, io};

use jsonrpsee::server::RpcModule;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

pub mod api;
mod server;

use server::{shutdown_channel, start as start_server};

use crate::adapters::fs as weft_fs;
use crate::config::Config;
use crate::hub::Hub;
use crate::ledger::{Ledger, LedgerError};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum DaemonError {
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error(transparent)]
  Ledger(#[from] LedgerError),
}

/// Shared state handed to every RPC handler.
pub struct DaemonState {
  pub socket_path: PathBuf,
  pub orchestrator: Arc<Orchestrator>,
}

/// Handle to the running daemon server.
pub struct DaemonHandle {
  task: JoinHandle<()>,
  keepalive: JoinHandle<()>,
  socket_path: PathBuf,
  orchestrator: Arc<Orchestrator>,
  // Dropping the server handle stops the server
  _server_handle: jsonrpsee::server::ServerHandle,
}

impl DaemonHandle {
  /// Stop the daemon task and remove the socket file if it exists.
  /// Worktrees of active runs are left for the next start to recover.
  pub fn stop(self) {
    self.task.abort();
    self.keepalive.abort();
    let _ = fs::remove_file(&self.socket_path);
  }

  /// Wait for the accept loop to end (after `daemon.shutdown`), then remove the
  /// worktrees of runs that were still active.
  pub async fn wait(self) {
    let _ = self.task.await;
    self.keepalive.abort();
    self.orchestrator.shutdown().await;
  }

  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  pub fn orchestrator(&self) -> &Arc<Orchestrator> {
    &self.orchestrator
  }
}

/// Open the ledger of `repo_root`, recover runs interrupted by a previous daemon and
/// start serving on `socket_path`.
pub async fn start(
  socket_path: &Path,
  repo_root: &Path,
  config: Config,
) -> Result<DaemonHandle, DaemonError> {
  weft_fs::ensure_layout(repo_root)?;
  let ledger = Arc::new(Ledger::open(&weft_fs::ledger_path(repo_root))?);
  let hub = Hub::new();
  let keepalive = hub.spawn_keepalive(Duration::from_secs(config.keepalive_secs.max(1)));
  let orchestrator = Arc::new(Orchestrator::new(repo_root, config, ledger, hub));

  if let Err(err) = orchestrator.recover_interrupted().await {
    warn!(event = "daemon_recover_failed", error = %err);
  }

  let mut module = RpcModule::new(DaemonState {
    socket_path: socket_path.to_path_buf(),
    orchestrator: orchestrator.clone(),
  });
  let (shutdown_tx, shutdown_rx) = shutdown_channel();
  api::daemon::register(&mut module, shutdown_tx);
  api::runs::register(&mut module);
  api::lanes::register(&mut module);

  let (task, server_handle) = match start_server(socket_path, module, shutdown_rx) {
    Ok(started) => started,
    Err(err) => {
      keepalive.abort();
      return Err(err.into());
    }
  };

  Ok(DaemonHandle {
    task,
    keepalive,
    socket_path: socket_path.to_path_buf(),
    orchestrator,
    _server_handle: server_handle,
  })
}
