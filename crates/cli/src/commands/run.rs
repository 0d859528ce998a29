use std::io::Read;

use weft_core::domain::RunStatus;
use weft_core::rpc::RunFinishParams;
use yansi::Paint;

use crate::{
  args::{self, FinishStatus},
  render,
  rpc::client,
  util::{
    daemon_proc::{current_thread_runtime, ensure_daemon_running},
    errors::exit_with_rpc_failure,
  },
};

fn read_package(path: &std::path::Path) -> std::io::Result<String> {
  if path.as_os_str() == "-" {
    let mut s = String::new();
    std::io::stdin().read_to_string(&mut s)?;
    return Ok(s);
  }
  std::fs::read_to_string(path)
}

pub fn submit(a: args::SubmitArgs) {
  let text = match read_package(&a.package) {
    Ok(t) => t,
    Err(e) => {
      eprintln!("submit failed: cannot read {}: {e}", a.package.display());
      std::process::exit(2);
    }
  };
  let package: serde_json::Value = match serde_json::from_str(&text) {
    Ok(v) => v,
    Err(e) => {
      eprintln!("submit failed: run package is not valid JSON: {e}");
      std::process::exit(2);
    }
  };
  let sock = ensure_daemon_running();
  match current_thread_runtime().block_on(client::run_create(&sock, package)) {
    Ok(run) => println!("{} {}", run.id, render::paint_status(run.status)),
    Err(e) => exit_with_rpc_failure("submit", &sock, &e),
  }
}

pub fn list() {
  let sock = ensure_daemon_running();
  match current_thread_runtime().block_on(client::run_list(&sock)) {
    Ok(list) => {
      println!("{:<36} {:<10} OBJECTIVE", "ID", "STATUS");
      for run in &list.runs {
        println!("{}", render::run_row(run));
      }
    }
    Err(e) => exit_with_rpc_failure("list", &sock, &e),
  }
}

pub fn show(a: args::RunRef) {
  let sock = ensure_daemon_running();
  let details = match current_thread_runtime().block_on(client::run_get(&sock, &a.run_id)) {
    Ok(d) => d,
    Err(e) => exit_with_rpc_failure("show", &sock, &e),
  };
  let run = &details.run;
  println!("{} {}", run.id.bold(), render::paint_status(run.status));
  println!("objective: {}", render::objective(run));
  if let Some(reason) = &run.reason {
    println!("reason:    {reason}");
  }
  println!("budget:    {} tokens, {:.4} cost", run.tokens_used, run.cost_used);
  if let Some(branch) = &details.integration_branch {
    println!("integration: {branch}");
  }
  for lane in &details.lanes {
    println!("  lane {:<16} {} {}", lane.agent_id, lane.branch, lane.path.display());
  }
  for queued in &details.queued {
    println!("  queued {} -> {}", queued.from_branch, queued.into_branch);
  }
  for task in &details.tasks {
    println!("  task {:<12} {:<10} {}", task.id, task.status.as_str(), task.title);
  }
  for result in &details.results {
    println!("  result {:<10} {:<10} {}", result.id, result.status.as_str(), result.summary);
  }
  for evidence in &details.evidence {
    println!("  evidence {:<8} {:<10} {}", evidence.id, evidence.status.as_str(), evidence.kind);
  }
  for artifact in &details.artifacts {
    println!("  artifact {:<8} {} {}", artifact.id, artifact.name, artifact.path);
  }
}

pub fn cancel(a: args::CancelArgs) {
  let sock = ensure_daemon_running();
  match current_thread_runtime().block_on(client::run_cancel(&sock, &a.run_id, a.reason)) {
    Ok(run) => println!("{} {}", run.id, render::paint_status(run.status)),
    Err(e) => exit_with_rpc_failure("cancel", &sock, &e),
  }
}

pub fn finish(a: args::FinishArgs) {
  let sock = ensure_daemon_running();
  let params = RunFinishParams {
    run_id: a.run_id,
    status: match a.status {
      FinishStatus::Completed => RunStatus::Completed,
      FinishStatus::Failed => RunStatus::Failed,
    },
    reason: a.reason,
  };
  match current_thread_runtime().block_on(client::run_finish(&sock, params)) {
    Ok(run) => println!("{} {}", run.id, render::paint_status(run.status)),
    Err(e) => exit_with_rpc_failure("finish", &sock, &e),
  }
}

pub fn merge(a: args::RunRef) {
  let sock = ensure_daemon_running();
  let report = match current_thread_runtime().block_on(client::merge_process(&sock, &a.run_id)) {
    Ok(r) => r,
    Err(e) => exit_with_rpc_failure("merge", &sock, &e),
  };
  for outcome in &report.outcomes {
    println!("{}", render::merge_outcome(outcome));
  }
  if report.cancelled {
    println!("{}", "merge queue cancelled".yellow());
  } else if report.halted {
    println!("{} ({} left queued)", "merge queue halted".red(), report.remaining.len());
  }
}
