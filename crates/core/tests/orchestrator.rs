use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use test_support::{TempRepo, poll_until};
use weft_core::config::Config;
use weft_core::domain::{RecordStatus, RunEvent, RunStatus, TaskRecord};
use weft_core::hub::{Frame, Hub};
use weft_core::lanes::LaneError;
use weft_core::ledger::Ledger;
use weft_core::merge_queue::MergeReport;
use weft_core::orchestrator::{BUDGET_EXHAUSTED, MergeRequest, Orchestrator, OrchestratorError};

fn config() -> Config {
  Config {
    fetch_on_init: false,
    ..Config::default()
  }
}

fn orchestrator(repo: &TempRepo) -> Orchestrator {
  Orchestrator::new(
    &repo.path(),
    config(),
    Arc::new(Ledger::in_memory().unwrap()),
    Hub::new(),
  )
}

fn kinds(orch: &Orchestrator, run_id: &str) -> Vec<&'static str> {
  orch
    .replay(run_id, 0, None)
    .unwrap()
    .iter()
    .map(|e| e.event.kind().as_str())
    .collect()
}

#[tokio::test]
async fn submit_prepares_lanes_and_runs() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch
    .submit(json!({ "objective": "build it", "agents": ["a", "b"] }))
    .await
    .unwrap();
  assert_eq!(run.status, RunStatus::Running);
  assert!(run.started_at.is_some());
  assert_eq!(
    kinds(&orch, &run.id),
    vec!["run.created", "run.status", "git.worktree.created", "git.worktree.created"]
  );
  let details = orch.details(&run.id).await.unwrap();
  assert_eq!(details.lanes.len(), 2);
  assert_eq!(
    details.integration_branch.as_deref(),
    Some(format!("weft/integration/{}", run.id).as_str())
  );
}

#[tokio::test]
async fn setup_failure_marks_run_failed() {
  let td = tempfile::tempdir().unwrap();
  let ledger = Arc::new(Ledger::in_memory().unwrap());
  let orch = Orchestrator::new(td.path(), config(), ledger.clone(), Hub::new());
  let err = orch.submit(json!({ "objective": "x" })).await.unwrap_err();
  assert!(matches!(err, OrchestratorError::Lane(LaneError::NotARepository(_))));

  let runs = ledger.runs().unwrap();
  assert_eq!(runs.len(), 1);
  assert_eq!(runs[0].status, RunStatus::Failed);
  assert!(runs[0].reason.as_deref().unwrap().contains("not a git repository"));
}

#[tokio::test]
async fn invalid_packages_create_no_run() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  assert!(matches!(
    orch.submit(json!({ "agents": ["a"] })).await,
    Err(OrchestratorError::Run(_))
  ));
  assert!(matches!(
    orch
      .submit(json!({ "objective": "x", "agents": ["a", "b", "c"], "policy": { "max_lanes": 2 } }))
      .await,
    Err(OrchestratorError::Run(_))
  ));
  assert!(orch.runs().unwrap().is_empty());
}

#[tokio::test]
async fn end_to_end_two_agents() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch.submit(json!({ "objective": "two agents" })).await.unwrap();

  for (agent, file) in [("a", "a.txt"), ("b", "b.txt")] {
    let lane = orch.ensure_lane(&run.id, agent).await.unwrap();
    std::fs::write(lane.path.join(file), agent).unwrap();
    assert_eq!(orch.touched_files(&run.id, agent).await.unwrap(), vec![file.to_string()]);
    assert!(orch.commit(&run.id, agent, "work").await.unwrap().is_some());
    orch
      .enqueue_merge(
        &run.id,
        MergeRequest {
          agent_id: Some(agent.to_string()),
          ..MergeRequest::default()
        },
      )
      .await
      .unwrap();
  }

  let report: MergeReport = orch.process_merges(&run.id).await.unwrap();
  assert_eq!(report.outcomes.len(), 2);
  assert!(!report.halted);
  let integration = format!("weft/integration/{}", run.id);
  assert_eq!(repo.file_at(&integration, "a.txt").as_deref(), Some("a"));
  assert_eq!(repo.file_at(&integration, "b.txt").as_deref(), Some("b"));

  let done = orch
    .finish(&run.id, RunStatus::Completed, Some("merged".into()))
    .await
    .unwrap();
  assert_eq!(done.status, RunStatus::Completed);
  assert!(done.finished_at.is_some());
  assert!(!repo.path().join(".weft/worktrees").join(&run.id).exists());
  assert!(matches!(
    orch.commit(&run.id, "a", "late").await,
    Err(OrchestratorError::NotActive {
      status: RunStatus::Completed,
      ..
    })
  ));
}

#[tokio::test]
async fn end_to_end_merges_in_queue_order() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch.submit(json!({ "objective": "queue order" })).await.unwrap();

  for agent in ["b", "a"] {
    let lane = orch.ensure_lane(&run.id, agent).await.unwrap();
    std::fs::write(lane.path.join(format!("{agent}.txt")), agent).unwrap();
    orch.commit(&run.id, agent, &format!("{agent} work")).await.unwrap();
  }
  for agent in ["a", "b"] {
    let req = MergeRequest {
      agent_id: Some(agent.to_string()),
      ..MergeRequest::default()
    };
    orch.enqueue_merge(&run.id, req).await.unwrap();
  }
  orch.process_merges(&run.id).await.unwrap();

  let integration = format!("weft/integration/{}", run.id);
  let tip = repo.repo.find_commit(repo.branch_tip(&integration).unwrap()).unwrap();
  let lane_b = format!("weft/{}/b", run.id);
  let lane_a = format!("weft/{}/a", run.id);
  assert!(tip.message().unwrap().contains(&lane_b));
  assert!(tip.parent(0).unwrap().message().unwrap().contains(&lane_a));

  let results: Vec<String> = orch
    .replay(&run.id, 0, None)
    .unwrap()
    .into_iter()
    .filter_map(|e| match e.event {
      RunEvent::MergeResult(r) => Some(r.merge.from_branch),
      _ => None,
    })
    .collect();
  assert_eq!(results, vec![lane_a, lane_b]);
}

#[tokio::test]
async fn merge_request_needs_a_source() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch.submit(json!({ "objective": "x" })).await.unwrap();
  assert!(matches!(
    orch.enqueue_merge(&run.id, MergeRequest::default()).await,
    Err(OrchestratorError::MissingMergeSource)
  ));
}

#[tokio::test]
async fn lane_limit_comes_from_policy() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch
    .submit(json!({ "objective": "x", "policy": { "max_lanes": 1 } }))
    .await
    .unwrap();
  orch.ensure_lane(&run.id, "a").await.unwrap();
  orch.ensure_lane(&run.id, "a").await.unwrap();
  assert!(matches!(
    orch.ensure_lane(&run.id, "b").await,
    Err(OrchestratorError::LaneLimit { max: 1, .. })
  ));
}

#[tokio::test]
async fn reports_project_records_and_enforce_budget() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch
    .submit(json!({ "objective": "x", "policy": { "max_tokens": 100 } }))
    .await
    .unwrap();

  orch
    .report(
      &run.id,
      RunEvent::TaskUpserted(TaskRecord {
        id: "t1".into(),
        title: "plan".into(),
        status: RecordStatus::Running,
        agent_id: None,
      }),
      None,
    )
    .await
    .unwrap();
  assert_eq!(orch.details(&run.id).await.unwrap().tasks.len(), 1);

  assert!(matches!(
    orch
      .report(&run.id, RunEvent::PreviewStopped { reason: None }, None)
      .await,
    Err(OrchestratorError::NotReportable(_))
  ));

  orch
    .report(&run.id, RunEvent::BudgetReported { tokens: 60, cost: 0.0 }, None)
    .await
    .unwrap();
  assert_eq!(orch.run(&run.id).unwrap().status, RunStatus::Running);
  orch
    .report(&run.id, RunEvent::BudgetReported { tokens: 50, cost: 0.0 }, None)
    .await
    .unwrap();
  let failed = orch.run(&run.id).unwrap();
  assert_eq!(failed.status, RunStatus::Failed);
  assert_eq!(failed.reason.as_deref(), Some(BUDGET_EXHAUSTED));
  assert_eq!(failed.tokens_used, 110);
  assert_eq!(orch.active_runs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_budget_reports_fail_the_run_once() {
  let repo = TempRepo::new();
  let orch = Arc::new(orchestrator(&repo));
  let run = orch
    .submit(json!({ "objective": "x", "policy": { "max_tokens": 100 } }))
    .await
    .unwrap();

  let mut handles = Vec::new();
  for _ in 0..8 {
    let orch = orch.clone();
    let run_id = run.id.clone();
    handles.push(tokio::spawn(async move {
      orch
        .report(&run_id, RunEvent::BudgetReported { tokens: 200, cost: 0.0 }, None)
        .await
    }));
  }
  let mut accepted = 0;
  for handle in handles {
    match handle.await.unwrap() {
      Ok(_) => accepted += 1,
      Err(OrchestratorError::NotActive { .. }) => {}
      Err(err) => panic!("unexpected report error: {err}"),
    }
  }
  assert!(accepted >= 1);

  let events = orch.replay(&run.id, 0, None).unwrap();
  let stored = events
    .iter()
    .filter(|e| matches!(e.event, RunEvent::BudgetReported { .. }))
    .count();
  assert_eq!(stored, accepted);
  let failures = events
    .iter()
    .filter(|e| {
      matches!(
        e.event,
        RunEvent::RunStatusChanged {
          status: RunStatus::Failed,
          ..
        }
      )
    })
    .count();
  assert_eq!(failures, 1);
  let failed = orch.run(&run.id).unwrap();
  assert_eq!(failed.status, RunStatus::Failed);
  assert_eq!(failed.reason.as_deref(), Some(BUDGET_EXHAUSTED));
  assert_eq!(orch.active_runs(), 0);
}

#[tokio::test]
async fn cancel_is_idempotent() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch.submit(json!({ "objective": "x", "agents": ["a"] })).await.unwrap();
  let cancelled = orch.cancel(&run.id, None).await.unwrap();
  assert_eq!(cancelled.status, RunStatus::Cancelled);
  let again = orch.cancel(&run.id, None).await.unwrap();
  assert_eq!(again.latest_event_id, cancelled.latest_event_id);
  assert!(matches!(
    orch.finish(&run.id, RunStatus::Completed, None).await,
    Err(OrchestratorError::NotActive { .. })
  ));
}

#[tokio::test]
async fn preview_lifecycle_is_recorded() {
  let repo = TempRepo::new();
  let orch = orchestrator(&repo);
  let run = orch.submit(json!({ "objective": "x" })).await.unwrap();
  orch
    .preview_start(&run.id, Some("npm run dev".into()), None)
    .unwrap();
  assert!(matches!(
    orch.preview_start(&run.id, None, None),
    Err(OrchestratorError::PreviewRunning(_))
  ));
  orch.preview_stop(&run.id, None).unwrap();
  assert!(matches!(
    orch.preview_stop(&run.id, None),
    Err(OrchestratorError::PreviewNotRunning(_))
  ));
  let k = kinds(&orch, &run.id);
  assert_eq!(k[k.len() - 2..], ["preview.started", "preview.stopped"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tail_replays_then_waits_for_live_frames() {
  let repo = TempRepo::new();
  let orch = Arc::new(orchestrator(&repo));
  let run = orch.submit(json!({ "objective": "x" })).await.unwrap();

  let stored = orch.tail(&run.id, 0, Duration::from_millis(10)).await.unwrap();
  assert_eq!(stored.len() as u64, run.latest_event_id);

  let idle = orch
    .tail(&run.id, run.latest_event_id, Duration::from_millis(50))
    .await
    .unwrap();
  assert!(idle.is_empty());

  let writer = orch.clone();
  let run_id = run.id.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(100)).await;
    writer.preview_start(&run_id, None, Some("http://localhost:3000".into())).unwrap();
  });
  let live = orch
    .tail(&run.id, run.latest_event_id, Duration::from_secs(5))
    .await
    .unwrap();
  match &live[..] {
    [Frame::Event { id, event_type, .. }] => {
      assert_eq!(id, &(run.latest_event_id + 1).to_string());
      assert_eq!(event_type, "preview.started");
    }
    other => panic!("unexpected frames {other:?}"),
  }
  assert_eq!(orch.hub().active_runs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tail_returns_every_event_when_publishes_cross() {
  let repo = TempRepo::new();
  let orch = Arc::new(orchestrator(&repo));
  let run = orch.submit(json!({ "objective": "x" })).await.unwrap();
  let after = run.latest_event_id;

  let tailer = orch.clone();
  let run_id = run.id.clone();
  let waiting =
    tokio::spawn(async move { tailer.tail(&run_id, after, Duration::from_secs(5)).await });
  let subscribed = poll_until(Duration::from_secs(2), Duration::from_millis(10), || {
    let count = orch.hub().subscriber_count(&run.id);
    async move { count == 1 }
  })
  .await;
  assert!(subscribed, "tail never subscribed");

  let first = orch
    .ledger()
    .append(&run.id, &RunEvent::PreviewStarted { command: None, url: None }, None)
    .unwrap();
  let second = orch
    .ledger()
    .append(&run.id, &RunEvent::PreviewStopped { reason: None }, None)
    .unwrap();
  // Second recorder wins the race to the hub; the first publish never happens in time.
  orch.hub().publish(&second);

  let frames = waiting.await.unwrap().unwrap();
  let ids: Vec<String> = frames
    .iter()
    .filter_map(|f| match f {
      Frame::Event { id, .. } => Some(id.clone()),
      Frame::Ping { .. } => None,
    })
    .collect();
  assert_eq!(
    ids,
    vec![first.event_id.to_string(), second.event_id.to_string()]
  );
  orch.hub().publish(&first);
}

#[tokio::test]
async fn restart_recovers_interrupted_runs() {
  let repo = TempRepo::new();
  let db = repo.path().join(".weft/ledger.db");
  let run_id = {
    let orch = Orchestrator::new(
      &repo.path(),
      config(),
      Arc::new(Ledger::open(&db).unwrap()),
      Hub::new(),
    );
    orch
      .submit(json!({ "objective": "x", "agents": ["a"] }))
      .await
      .unwrap()
      .id
  };
  assert!(repo.path().join(".weft/worktrees").join(&run_id).exists());

  let orch = Orchestrator::new(
    &repo.path(),
    config(),
    Arc::new(Ledger::open(&db).unwrap()),
    Hub::new(),
  );
  assert_eq!(orch.recover_interrupted().await.unwrap(), vec![run_id.clone()]);
  let run = orch.run(&run_id).unwrap();
  assert_eq!(run.status, RunStatus::Failed);
  assert!(run.reason.unwrap().contains("interrupted"));
  assert!(!repo.path().join(".weft/worktrees").join(&run_id).exists());
  assert!(orch.recover_interrupted().await.unwrap().is_empty());
}
