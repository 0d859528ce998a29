pub mod event;
pub mod records;
pub mod run;

pub use event::{
  CheckFailure, Emitter, EventKind, MergeRef, MergeResultPayload, MergeStatus, RunEvent, StoredEvent,
};
pub use records::{ArtifactRecord, EvidenceRecord, RecordStatus, ResultRecord, TaskRecord};
pub use run::{RunError, RunPackage, RunPolicy, RunSnapshot, RunStatus};
