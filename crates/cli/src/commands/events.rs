use std::collections::HashSet;

use weft_core::domain::RunStatus;
use weft_core::hub::Frame;
use weft_core::reducer::{Timeline, TimelineEntry, reduce};

use crate::{
  args,
  render,
  rpc::client::{self, RpcSession},
  util::{
    daemon_proc::{current_thread_runtime, ensure_daemon_running},
    errors::exit_with_rpc_failure,
  },
};

const FOLLOW_WAIT_MS: u64 = 10_000;

/// Timeline plus the ids already written to the terminal.
#[derive(Debug, Default)]
pub struct Printer {
  timeline: Timeline,
  printed: HashSet<String>,
}

impl Printer {
  /// Fold `frames` into the timeline and return entries not printed before, in order.
  pub fn absorb(&mut self, frames: Vec<Frame>) -> Vec<TimelineEntry> {
    let timeline = std::mem::take(&mut self.timeline);
    self.timeline = frames.into_iter().fold(timeline, reduce);
    self
      .timeline
      .entries()
      .iter()
      .filter(|e| self.printed.insert(e.id.clone()))
      .cloned()
      .collect()
  }

  pub fn cursor(&self, floor: u64) -> u64 {
    self.timeline.last_numeric_id().unwrap_or(floor).max(floor)
  }
}

/// True once a `run.status` entry reports a terminal status.
pub fn reached_terminal(entries: &[TimelineEntry]) -> bool {
  entries.iter().any(|e| {
    e.event_type == "run.status"
      && e
        .payload
        .get("status")
        .and_then(|s| s.as_str())
        .and_then(RunStatus::parse)
        .is_some_and(|s| s.is_terminal())
  })
}

pub fn show_events(a: args::EventsArgs) {
  let sock = ensure_daemon_running();
  let rt = current_thread_runtime();
  let mut printer = Printer::default();

  let first = match rt.block_on(client::run_events(&sock, &a.run_id, a.after)) {
    Ok(r) => r,
    Err(e) => exit_with_rpc_failure("events", &sock, &e),
  };
  let fresh = printer.absorb(first.frames);
  for entry in &fresh {
    println!("{}", render::event_line(entry));
  }
  if !a.follow {
    return;
  }
  let run = match rt.block_on(client::run_get(&sock, &a.run_id)) {
    Ok(d) => d.run,
    Err(e) => exit_with_rpc_failure("events", &sock, &e),
  };
  if run.status.is_terminal() {
    return;
  }

  let session = RpcSession::new();
  loop {
    let after = printer.cursor(a.after);
    let res = rt.block_on(session.run_tail(&sock, &a.run_id, after, FOLLOW_WAIT_MS));
    let frames = match res {
      Ok(r) => r.frames,
      Err(e) => exit_with_rpc_failure("events", &sock, &e),
    };
    let fresh = printer.absorb(frames);
    for entry in &fresh {
      println!("{}", render::event_line(entry));
    }
    if reached_terminal(&fresh) {
      break;
    }
  }
}
