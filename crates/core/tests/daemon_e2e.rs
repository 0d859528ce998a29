use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::{Value, json};
use test_support::{RpcResp, TempRepo, UnixRpcClient, poll_until};
use weft_core::{
  adapters::fs as weft_fs,
  config::{Config, LogLevel},
  daemon::DaemonHandle,
  domain::{RunSnapshot, RunStatus},
  lanes::Lane,
  logging,
  merge_queue::MergeReport,
  orchestrator::RunDetails,
  reducer::{Timeline, reduce},
  rpc::{CommitResult, DaemonStatus, FramesResponse, RunListResponse, codes},
};

struct TestEnv {
  repo: TempRepo,
  log_path: PathBuf,
  sock: PathBuf,
  handle: DaemonHandle,
  _sock_dir: tempfile::TempDir,
}

static LOG_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

fn ensure_logging_once() -> PathBuf {
  if let Some(p) = LOG_PATH.get() {
    return p.clone();
  }
  let td = tempfile::tempdir().unwrap();
  let log_path = weft_fs::logs_path(td.path());
  logging::init(&log_path, LogLevel::Info);
  let _ = LOG_DIR.set(td);
  let _ = LOG_PATH.set(log_path.clone());
  log_path
}

async fn start_test_env() -> TestEnv {
  let log_path = ensure_logging_once();
  let repo = TempRepo::new();
  let sock_dir = tempfile::tempdir().unwrap();
  let sock = sock_dir.path().join("weft.sock");
  let cfg = Config {
    fetch_on_init: false,
    keepalive_secs: 1,
    ..Config::default()
  };
  let handle = weft_core::daemon::start(&sock, &repo.path(), cfg)
    .await
    .expect("start daemon");

  let client = UnixRpcClient::new(&sock);
  let ok = poll_until(Duration::from_secs(2), Duration::from_millis(50), || {
    let c = &client;
    async move {
      let r: RpcResp<DaemonStatus> = c.call("daemon.status", None).await;
      r.error.is_none()
    }
  })
  .await;
  assert!(ok, "daemon did not become ready in time");

  TestEnv {
    repo,
    log_path,
    sock,
    handle,
    _sock_dir: sock_dir,
  }
}

async fn ok<T: serde::de::DeserializeOwned>(client: &UnixRpcClient, method: &str, params: Value) -> T {
  let resp: RpcResp<T> = client.call(method, Some(params)).await;
  assert!(resp.error.is_none(), "{method} failed: {:?}", resp.error);
  resp.result.expect("has result")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daemon_status_roundtrip() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);

  let v: RpcResp<DaemonStatus> = client.call("daemon.status", None).await;
  assert_eq!(v.jsonrpc, "2.0");
  let status = v.result.expect("has result");
  assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
  assert!(status.pid > 0);
  assert_eq!(status.socket_path, env.sock.display().to_string());
  assert_eq!(status.repo_root, env.repo.path().display().to_string());
  assert_eq!(status.active_runs, 0);

  tokio::time::sleep(Duration::from_millis(100)).await;
  if let Ok(log_text) = std::fs::read_to_string(&env.log_path)
    && !log_text.is_empty()
  {
    assert!(
      log_text.contains("daemon_status"),
      "missing daemon_status log entry; logs: {log_text}"
    );
  }

  env.handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_method_returns_error() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);

  let v: RpcResp<Value> = client.call("daemon.nope", None).await;
  assert!(v.result.is_none());
  let err = v.error.expect("should have error");
  assert_eq!(err.code, -32601);

  env.handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_run_uses_stable_code() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);

  let v: RpcResp<Value> = client
    .call("run.cancel", Some(json!({ "run_id": "missing" })))
    .await;
  assert_eq!(v.error.expect("error").code, codes::RUN_NOT_FOUND);

  let v: RpcResp<Value> = client
    .call(
      "run.report",
      Some(json!({ "run_id": "missing", "type": "git.commit", "payload": {} })),
    )
    .await;
  assert_eq!(v.error.expect("error").code, codes::INVALID_REQUEST);

  env.handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_lifecycle_over_rpc() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);

  let run: RunSnapshot = ok(
    &client,
    "run.create",
    json!({ "package": { "objective": "rpc run", "agents": ["a"] } }),
  )
  .await;
  assert_eq!(run.status, RunStatus::Running);

  let lane: Lane = ok(&client, "lane.ensure", json!({ "run_id": run.id, "agent_id": "a" })).await;
  std::fs::write(lane.path.join("a.txt"), "from a").unwrap();
  let commit: CommitResult = ok(
    &client,
    "lane.commit",
    json!({ "run_id": run.id, "agent_id": "a", "message": "add a" }),
  )
  .await;
  assert!(commit.hash.is_some());
  let noop: CommitResult = ok(
    &client,
    "lane.commit",
    json!({ "run_id": run.id, "agent_id": "a", "message": "again" }),
  )
  .await;
  assert_eq!(noop.hash, None);

  let _: Value = ok(&client, "merge.enqueue", json!({ "run_id": run.id, "agent_id": "a" })).await;
  let report: MergeReport = ok(&client, "merge.process", json!({ "run_id": run.id })).await;
  assert_eq!(report.outcomes.len(), 1);
  assert!(!report.halted);

  let details: RunDetails = ok(&client, "run.get", json!({ "run_id": run.id })).await;
  assert_eq!(details.lanes.len(), 1);
  let integration = details.integration_branch.unwrap();
  assert_eq!(env.repo.file_at(&integration, "a.txt").as_deref(), Some("from a"));

  let events: FramesResponse = ok(&client, "run.events", json!({ "run_id": run.id })).await;
  let timeline = events.frames.iter().cloned().fold(Timeline::new(), reduce);
  let types: Vec<&str> = timeline.entries().iter().map(|e| e.event_type.as_str()).collect();
  assert_eq!(
    types,
    vec![
      "run.created",
      "run.status",
      "git.worktree.created",
      "git.files.touched",
      "git.commit",
      "git.merge.queued",
      "git.merge.attempt",
      "git.merge.result",
    ]
  );

  let list: RunListResponse = ok(&client, "run.list", json!({})).await;
  assert_eq!(list.runs.len(), 1);

  let done: RunSnapshot = ok(
    &client,
    "run.finish",
    json!({ "run_id": run.id, "status": "completed" }),
  )
  .await;
  assert_eq!(done.status, RunStatus::Completed);
  assert!(!lane.path.exists());

  let v: RpcResp<Value> = client
    .call("lane.ensure", Some(json!({ "run_id": run.id, "agent_id": "b" })))
    .await;
  assert_eq!(v.error.expect("error").code, codes::RUN_NOT_ACTIVE);

  env.handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tail_delivers_live_events_and_pings() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);

  let run: RunSnapshot = ok(&client, "run.create", json!({ "package": { "objective": "tail" } })).await;
  let after = run.latest_event_id;

  let tail = client.call::<FramesResponse>(
    "run.tail",
    Some(json!({ "run_id": run.id, "after": after, "wait_ms": 5000 })),
  );
  let start = async {
    tokio::time::sleep(Duration::from_millis(200)).await;
    client
      .call::<Value>("preview.start", Some(json!({ "run_id": run.id, "url": "http://localhost:5173" })))
      .await
  };
  let (tailed, started) = tokio::join!(tail, start);
  assert!(started.error.is_none(), "{:?}", started.error);
  let frames = tailed.result.expect("frames").frames;
  let timeline = frames.into_iter().fold(Timeline::new(), reduce);
  let live: Vec<&str> = timeline.entries().iter().map(|e| e.event_type.as_str()).collect();
  // A keep-alive may arrive first; it never shows up in the timeline.
  assert!(live.is_empty() || live == vec!["preview.started"], "{live:?}");

  let idle: FramesResponse = ok(
    &client,
    "run.tail",
    json!({ "run_id": run.id, "after": after + 1, "wait_ms": 3000 }),
  )
  .await;
  assert!(
    idle
      .frames
      .iter()
      .all(|f| matches!(f, weft_core::hub::Frame::Ping { .. })),
    "{:?}",
    idle.frames
  );

  env.handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cleans_active_runs() {
  let env = start_test_env().await;
  let client = UnixRpcClient::new(&env.sock);
  let run: RunSnapshot = ok(
    &client,
    "run.create",
    json!({ "package": { "objective": "bye", "agents": ["a"] } }),
  )
  .await;
  let run_dir = env.repo.path().join(".weft/worktrees").join(&run.id);
  assert!(run_dir.exists());

  let _: bool = ok(&client, "daemon.shutdown", json!({})).await;
  tokio::time::timeout(Duration::from_secs(5), env.handle.wait())
    .await
    .expect("daemon stopped");
  assert!(!run_dir.exists());
  assert!(!env.sock.exists());
}
