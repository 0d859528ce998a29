use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use tokio::sync::watch;
use tracing::info;

use crate::daemon::DaemonState;
use crate::rpc::DaemonStatus;

/// Register daemon.status and daemon.shutdown.
pub fn register(module: &mut RpcModule<DaemonState>, shutdown_tx: watch::Sender<bool>) {
  module
    .register_method(
      "daemon.status",
      |_params, ctx: &DaemonState, _ext| -> RpcResult<serde_json::Value> {
        let status = DaemonStatus {
          version: env!("CARGO_PKG_VERSION").to_string(),
          pid: std::process::id(),
          socket_path: ctx.socket_path.display().to_string(),
          repo_root: ctx.orchestrator.repo_root().display().to_string(),
          active_runs: ctx.orchestrator.active_runs(),
        };
        info!(event = "daemon_status", pid = status.pid, active_runs = status.active_runs, "status served");
        Ok(serde_json::json!(status))
      },
    )
    .expect("register daemon.status");

  module
    .register_method(
      "daemon.shutdown",
      move |_params, _ctx: &DaemonState, _ext| -> RpcResult<serde_json::Value> {
        info!(event = "daemon_shutdown_requested", "shutdown requested via RPC");
        let _ = shutdown_tx.send(true);
        Ok(serde_json::json!(true))
      },
    )
    .expect("register daemon.shutdown");
}
