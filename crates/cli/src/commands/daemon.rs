use crate::{
  rpc::client,
  util::daemon_proc::{
    current_thread_runtime, repo_root, resolve_socket, spawn_daemon_background, wait_for_daemon,
  },
};
use yansi::Paint;

pub fn print_status() {
  match resolve_socket() {
    Some(sock) => {
      let res = current_thread_runtime().block_on(async move { client::daemon_status(&sock).await });
      match res {
        Ok(status) => {
          println!(
            "daemon: {} (v{}, pid {}, socket {}, repo {}, {} active run(s))",
            "running".green(),
            status.version,
            status.pid,
            status.socket_path,
            status.repo_root,
            status.active_runs
          );
        }
        Err(_) => {
          println!("daemon: stopped");
        }
      }
    }
    None => println!("daemon: stopped"),
  }
}

pub fn run_daemon_foreground() {
  let Some(sock) = resolve_socket() else {
    eprintln!("could not resolve socket path");
    std::process::exit(1);
  };
  let root = repo_root();
  let cfg = match weft_core::config::load(Some(&root)) {
    Ok(cfg) => cfg,
    Err(e) => {
      eprintln!("invalid config: {e}");
      std::process::exit(2);
    }
  };
  let rt = tokio::runtime::Builder::new_multi_thread()
    .enable_io()
    .enable_time()
    .worker_threads(2)
    .build()
    .unwrap_or_else(|e| {
      eprintln!("failed to start async runtime: {e}");
      std::process::exit(1);
    });
  rt.block_on(async move {
    match weft_core::daemon::start(&sock, &root, cfg).await {
      Ok(handle) => {
        handle.wait().await;
      }
      Err(e) => {
        eprintln!("failed to start daemon: {e}");
        std::process::exit(1);
      }
    }
  });
}

pub fn start_daemon() {
  let Some(sock) = resolve_socket() else {
    println!("daemon: stopped");
    return;
  };
  let rt = current_thread_runtime();
  if rt.block_on(async { client::daemon_status(&sock).await.is_ok() }) {
    print_status();
    return;
  }

  if spawn_daemon_background(&sock, &repo_root()).is_err() {
    println!("daemon: stopped");
    return;
  }

  if rt.block_on(wait_for_daemon(&sock, true)) {
    print_status();
  } else {
    println!("daemon: stopped");
  }
}

pub fn stop_daemon() {
  let Some(sock) = resolve_socket() else {
    println!("daemon: stopped");
    return;
  };
  let rt = current_thread_runtime();
  let _ = rt.block_on(async move {
    let _ = client::daemon_shutdown(&sock).await;
    wait_for_daemon(&sock, false).await
  });
  println!("daemon: stopped");
}

pub fn restart_daemon() {
  stop_daemon();
  start_daemon();
}
