use std::sync::Arc;

use tracing::warn;

use crate::domain::{Emitter, RunEvent, StoredEvent};
use crate::hub::Hub;
use crate::ledger::{self, Ledger};

/// Durable-then-live write path for one run: append to the ledger, and only once the
/// transaction committed hand the stored event to the hub.
pub struct Recorder {
  run_id: String,
  ledger: Arc<Ledger>,
  hub: Hub,
}

impl Recorder {
  pub fn new(run_id: &str, ledger: Arc<Ledger>, hub: Hub) -> Self {
    Self {
      run_id: run_id.to_string(),
      ledger,
      hub,
    }
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn record(&self, event: &RunEvent, seq: Option<u64>) -> ledger::Result<StoredEvent> {
    let stored = self.ledger.append(&self.run_id, event, seq)?;
    self.hub.publish(&stored);
    Ok(stored)
  }
}

impl Emitter for Recorder {
  fn emit(&self, event: RunEvent) {
    if let Err(err) = self.record(&event, None) {
      warn!(
        event = "record_failed",
        run_id = %self.run_id,
        kind = event.kind().as_str(),
        error = %err,
      );
    }
  }
}
