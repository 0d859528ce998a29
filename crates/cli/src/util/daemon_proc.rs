use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rpc::client;

/// Environment variable telling a spawned `daemon run` which repository it serves.
pub const REPO_ROOT_ENV: &str = "WEFT_REPO_ROOT";

pub fn resolve_socket() -> Option<PathBuf> {
  weft_core::config::resolve_socket_path().ok()
}

/// Repository the daemon serves: `WEFT_REPO_ROOT`, else the current directory.
pub fn repo_root() -> PathBuf {
  std::env::var_os(REPO_ROOT_ENV)
    .map(PathBuf::from)
    .or_else(|| std::env::current_dir().ok())
    .unwrap_or_else(|| PathBuf::from("."))
}

pub fn current_thread_runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_io()
    .enable_time()
    .build()
    .unwrap_or_else(|e| {
      eprintln!("failed to start async runtime: {e}");
      std::process::exit(1);
    })
}

/// Poll `daemon.status` until it answers as `want_running`, for up to two seconds.
pub async fn wait_for_daemon(sock: &Path, want_running: bool) -> bool {
  for _ in 0..20u8 {
    if client::daemon_status(sock).await.is_ok() == want_running {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
  false
}

pub fn ensure_daemon_running() -> PathBuf {
  let Some(sock) = resolve_socket() else {
    eprintln!("could not resolve socket path");
    std::process::exit(1);
  };

  let rt = current_thread_runtime();
  if rt.block_on(async { client::daemon_status(&sock).await.is_ok() }) {
    return sock;
  }

  let _ = spawn_daemon_background(&sock, &repo_root());
  let _ = rt.block_on(wait_for_daemon(&sock, true));
  sock
}

pub fn spawn_daemon_background(sock: &Path, repo_root: &Path) -> std::io::Result<()> {
  let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("weft"));
  let mut cmd = std::process::Command::new(exe);
  cmd.arg("daemon").arg("run");
  cmd.env("WEFT_SOCKET", sock);
  cmd.env(REPO_ROOT_ENV, repo_root);
  cmd
    .stdin(std::process::Stdio::null())
    .stdout(std::process::Stdio::null())
    .stderr(std::process::Stdio::null());
  let _ = cmd.spawn()?;
  Ok(())
}
