pub mod daemon;
pub mod lanes;
pub mod runs;

use jsonrpsee::types::ErrorObjectOwned;

use crate::lanes::LaneError;
use crate::ledger::LedgerError;
use crate::orchestrator::OrchestratorError;
use crate::rpc::codes;

/// Map an orchestrator error to a JSON-RPC error with a stable code.
pub(crate) fn rpc_error(err: OrchestratorError) -> ErrorObjectOwned {
  let code = match &err {
    OrchestratorError::Ledger(LedgerError::RunNotFound(_)) => codes::RUN_NOT_FOUND,
    OrchestratorError::Ledger(LedgerError::InvalidTransition { .. }) => codes::INVALID_TRANSITION,
    OrchestratorError::Ledger(
      LedgerError::NonMonotonic { .. } | LedgerError::IdOutOfRange { .. },
    ) => codes::NON_MONOTONIC,
    OrchestratorError::Ledger(_) => codes::INTERNAL,
    OrchestratorError::Lane(LaneError::NotARepository(_)) => codes::NOT_A_REPOSITORY,
    OrchestratorError::Lane(LaneError::Cancelled) => codes::CANCELLED,
    OrchestratorError::Lane(
      LaneError::SlugCollision { .. } | LaneError::UnknownLane(_) | LaneError::NotInitialized,
    ) => codes::LANE,
    OrchestratorError::Lane(_) => codes::INTERNAL,
    OrchestratorError::Run(_)
    | OrchestratorError::NotReportable(_)
    | OrchestratorError::InvalidFinish(_)
    | OrchestratorError::MissingMergeSource => codes::INVALID_REQUEST,
    OrchestratorError::NotActive { .. } => codes::RUN_NOT_ACTIVE,
    OrchestratorError::LaneLimit { .. } => codes::LANE_LIMIT,
    OrchestratorError::PreviewRunning(_) | OrchestratorError::PreviewNotRunning(_) => codes::PREVIEW,
  };
  ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}

pub(crate) fn invalid_request(msg: impl ToString) -> ErrorObjectOwned {
  ErrorObjectOwned::owned(codes::INVALID_REQUEST, msg.to_string(), None::<()>)
}
