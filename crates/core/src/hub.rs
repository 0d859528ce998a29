//! Live fan-out of appended events to per-run subscribers.
//!
//! The hub keeps no history. Publishing to a run nobody watches does nothing;
//! late subscribers catch up from the ledger instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::StoredEvent;

/// One message on the wire to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
  Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
  },
  /// Keep-alive. Carries no event id.
  Ping { run_id: String },
}

impl Frame {
  pub fn from_stored(event: &StoredEvent) -> serde_json::Result<Self> {
    let (kind, payload) = event.event.to_parts()?;
    Ok(Frame::Event {
      id: event.event_id.to_string(),
      event_type: kind.to_string(),
      payload,
    })
  }
}

#[derive(Debug, thiserror::Error)]
#[error("subscriber is gone")]
pub struct SinkClosed;

/// Destination for frames of one run. A sink returning an error is dropped.
pub trait EventSink: Send {
  fn deliver(&mut self, frame: &Frame) -> Result<(), SinkClosed>;
}

impl EventSink for mpsc::UnboundedSender<Frame> {
  fn deliver(&mut self, frame: &Frame) -> Result<(), SinkClosed> {
    self.send(frame.clone()).map_err(|_| SinkClosed)
  }
}

type Sinks = HashMap<String, HashMap<u64, Box<dyn EventSink>>>;

#[derive(Default)]
struct Inner {
  runs: Mutex<Sinks>,
  next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Hub {
  inner: Arc<Inner>,
}

/// Removes its sink when dropped.
pub struct Subscription {
  hub: Weak<Inner>,
  run_id: String,
  id: u64,
}

impl Subscription {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.hub.upgrade() {
      remove(&mut inner.runs.lock(), &self.run_id, self.id);
    }
  }
}

fn remove(runs: &mut Sinks, run_id: &str, id: u64) {
  if let Some(sinks) = runs.get_mut(run_id) {
    sinks.remove(&id);
    if sinks.is_empty() {
      runs.remove(run_id);
    }
  }
}

impl Hub {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, run_id: &str, sink: Box<dyn EventSink>) -> Subscription {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    self
      .inner
      .runs
      .lock()
      .entry(run_id.to_string())
      .or_default()
      .insert(id, sink);
    debug!(event = "hub_subscribe", run_id, sink = id);
    Subscription {
      hub: Arc::downgrade(&self.inner),
      run_id: run_id.to_string(),
      id,
    }
  }

  /// Convenience: subscribe a channel and return its receiving half.
  pub fn subscribe_channel(&self, run_id: &str) -> (Subscription, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (self.subscribe(run_id, Box::new(tx)), rx)
  }

  /// Frame `event` and deliver it to every sink of its run. Returns the number of sinks
  /// that accepted it.
  pub fn publish(&self, event: &StoredEvent) -> usize {
    let mut runs = self.inner.runs.lock();
    if !runs.contains_key(&event.run_id) {
      return 0;
    }
    let frame = match Frame::from_stored(event) {
      Ok(frame) => frame,
      Err(err) => {
        warn!(event = "hub_frame_error", run_id = %event.run_id, error = %err);
        return 0;
      }
    };
    deliver(&mut runs, &event.run_id, &frame)
  }

  pub fn publish_ping(&self, run_id: &str) -> usize {
    let mut runs = self.inner.runs.lock();
    if !runs.contains_key(run_id) {
      return 0;
    }
    let frame = Frame::Ping {
      run_id: run_id.to_string(),
    };
    deliver(&mut runs, run_id, &frame)
  }

  pub fn subscriber_count(&self, run_id: &str) -> usize {
    self.inner.runs.lock().get(run_id).map_or(0, HashMap::len)
  }

  /// Number of runs with at least one subscriber.
  pub fn active_runs(&self) -> usize {
    self.inner.runs.lock().len()
  }

  /// Ping every watched run each `interval`. Stops once the hub is dropped.
  pub fn spawn_keepalive(&self, interval: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let hub = Hub { inner };
        let run_ids: Vec<String> = hub.inner.runs.lock().keys().cloned().collect();
        for run_id in run_ids {
          hub.publish_ping(&run_id);
        }
      }
    })
  }
}

fn deliver(runs: &mut Sinks, run_id: &str, frame: &Frame) -> usize {
  let Some(sinks) = runs.get_mut(run_id) else {
    return 0;
  };
  let mut dead = Vec::new();
  for (id, sink) in sinks.iter_mut() {
    if sink.deliver(frame).is_err() {
      dead.push(*id);
    }
  }
  let delivered = sinks.len() - dead.len();
  for id in dead {
    debug!(event = "hub_sink_dropped", run_id, sink = id);
    remove(runs, run_id, id);
  }
  delivered
}
