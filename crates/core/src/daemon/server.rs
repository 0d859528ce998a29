use std::fs;
use std::io;
use std::path::Path;

use jsonrpsee::server::{self, RpcModule};
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::DaemonState;

/// Create a shutdown channel for coordinating server termination.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
  watch::channel(false)
}

/// Bind the Unix socket and spawn the accept loop serving HTTP JSON-RPC on each connection.
pub fn start(
  socket_path: &Path,
  module: RpcModule<DaemonState>,
  mut shutdown_rx: watch::Receiver<bool>,
) -> io::Result<(JoinHandle<()>, server::ServerHandle)> {
  if let Some(parent) = socket_path.parent() {
    fs::create_dir_all(parent)?;
  }
  let _ = fs::remove_file(socket_path);

  let listener = UnixListener::bind(socket_path)?;
  let sock = socket_path.to_path_buf();

  let svc_builder = server::Server::builder().to_service_builder();
  let (stop_handle, server_handle) = server::stop_channel();

  info!(event = "daemon_started", socket = %socket_path.display(), "daemon server started");

  let task = tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = shutdown_rx.changed() => {
          info!(event = "daemon_shutdown", "shutdown signal received; stopping accept loop");
          break;
        }
        res = listener.accept() => {
          match res {
            Ok((stream, _addr)) => {
              let svc = svc_builder.clone().build(module.clone(), stop_handle.clone());
              tokio::spawn(async move {
                if let Err(e) = server::serve(stream, svc).await {
                  error!(event = "daemon_serve_error", error = %e);
                }
              });
            }
            Err(e) => {
              error!(event = "daemon_accept_error", error = %e);
              break;
            }
          }
        }
      }
    }
    let _ = fs::remove_file(&sock);
    info!(event = "daemon_stopped", socket = %sock.display(), "daemon server stopped");
  });

  Ok((task, server_handle))
}
