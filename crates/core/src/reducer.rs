//! Client-side timeline reconstruction from a possibly duplicated, out-of-order stream.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hub::Frame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
  pub id: String,
  #[serde(rename = "type")]
  pub event_type: String,
  pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
  entries: Vec<TimelineEntry>,
  seen: HashSet<String>,
}

impl Timeline {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[TimelineEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.seen.contains(id)
  }

  /// Highest id seen when all ids are numeric. Used to resume a stream.
  pub fn last_numeric_id(&self) -> Option<u64> {
    self.entries.iter().filter_map(|e| e.id.parse::<u64>().ok()).max()
  }
}

/// Numeric when both ids parse as integers, lexicographic otherwise.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
  match (a.parse::<u64>(), b.parse::<u64>()) {
    (Ok(x), Ok(y)) => x.cmp(&y),
    _ => a.cmp(b),
  }
}

/// Fold one frame into the timeline. Pings and already-seen ids leave it unchanged.
pub fn reduce(mut timeline: Timeline, frame: Frame) -> Timeline {
  let Frame::Event {
    id,
    event_type,
    payload,
  } = frame
  else {
    return timeline;
  };
  if !timeline.seen.insert(id.clone()) {
    return timeline;
  }
  let at = timeline
    .entries
    .partition_point(|e| compare_ids(&e.id, &id) != Ordering::Greater);
  timeline.entries.insert(
    at,
    TimelineEntry {
      id,
      event_type,
      payload,
    },
  );
  timeline
}
