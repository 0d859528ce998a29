use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use jsonrpsee::types::Params;
use serde_json::{Value, json};
use tracing::info;

use super::{invalid_request, rpc_error};
use crate::daemon::DaemonState;
use crate::domain::RunEvent;
use crate::hub::Frame;
use crate::rpc::{
  FramesResponse, MAX_TAIL_WAIT_MS, PreviewStartParams, PreviewStopParams, RunCancelParams,
  RunCreateParams, RunEventsParams, RunFinishParams, RunIdParams, RunListResponse,
  RunReportParams, RunReportResult, RunTailParams,
};

const DEFAULT_TAIL_WAIT_MS: u64 = 10_000;

/// Register run lifecycle, event and preview APIs.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_async_method("run.create", |params, ctx, _ext| create(params, ctx))
    .expect("register run.create");
  module
    .register_async_method("run.get", |params, ctx, _ext| get(params, ctx))
    .expect("register run.get");
  module
    .register_async_method("run.cancel", |params, ctx, _ext| cancel(params, ctx))
    .expect("register run.cancel");
  module
    .register_async_method("run.finish", |params, ctx, _ext| finish(params, ctx))
    .expect("register run.finish");
  module
    .register_async_method("run.report", |params, ctx, _ext| report(params, ctx))
    .expect("register run.report");
  module
    .register_async_method("run.tail", |params, ctx, _ext| tail(params, ctx))
    .expect("register run.tail");

  module
    .register_method(
      "run.list",
      |_params, ctx: &DaemonState, _ext| -> RpcResult<Value> {
        let runs = ctx.orchestrator.runs().map_err(rpc_error)?;
        Ok(json!(RunListResponse { runs }))
      },
    )
    .expect("register run.list");

  module
    .register_method(
      "run.events",
      |params, ctx: &DaemonState, _ext| -> RpcResult<Value> {
        let p: RunEventsParams = params.parse()?;
        let events = ctx
          .orchestrator
          .replay(&p.run_id, p.after, p.limit)
          .map_err(rpc_error)?;
        let frames = events
          .iter()
          .map(Frame::from_stored)
          .collect::<Result<Vec<_>, _>>()
          .map_err(|e| invalid_request(e.to_string()))?;
        Ok(json!(FramesResponse { frames }))
      },
    )
    .expect("register run.events");

  module
    .register_method(
      "preview.start",
      |params, ctx: &DaemonState, _ext| -> RpcResult<Value> {
        let p: PreviewStartParams = params.parse()?;
        let stored = ctx
          .orchestrator
          .preview_start(&p.run_id, p.command, p.url)
          .map_err(rpc_error)?;
        info!(event = "preview_started", run_id = %p.run_id, event_id = stored.event_id);
        Ok(json!(RunReportResult {
          event_id: stored.event_id
        }))
      },
    )
    .expect("register preview.start");

  module
    .register_method(
      "preview.stop",
      |params, ctx: &DaemonState, _ext| -> RpcResult<Value> {
        let p: PreviewStopParams = params.parse()?;
        let stored = ctx
          .orchestrator
          .preview_stop(&p.run_id, p.reason)
          .map_err(rpc_error)?;
        info!(event = "preview_stopped", run_id = %p.run_id, event_id = stored.event_id);
        Ok(json!(RunReportResult {
          event_id: stored.event_id
        }))
      },
    )
    .expect("register preview.stop");
}

async fn create(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunCreateParams = params.parse()?;
  let run = ctx.orchestrator.submit(p.package).await.map_err(rpc_error)?;
  info!(event = "run_create", run_id = %run.id, "run created");
  Ok(json!(run))
}

async fn get(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunIdParams = params.parse()?;
  let details = ctx.orchestrator.details(&p.run_id).await.map_err(rpc_error)?;
  Ok(json!(details))
}

async fn cancel(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunCancelParams = params.parse()?;
  let run = ctx
    .orchestrator
    .cancel(&p.run_id, p.reason)
    .await
    .map_err(rpc_error)?;
  Ok(json!(run))
}

async fn finish(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunFinishParams = params.parse()?;
  let run = ctx
    .orchestrator
    .finish(&p.run_id, p.status, p.reason)
    .await
    .map_err(rpc_error)?;
  Ok(json!(run))
}

async fn report(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunReportParams = params.parse()?;
  let event = RunEvent::from_parts(&p.event_type, p.payload)
    .map_err(|e| invalid_request(format!("invalid `{}` event: {e}", p.event_type)))?;
  let stored = ctx
    .orchestrator
    .report(&p.run_id, event, p.seq)
    .await
    .map_err(rpc_error)?;
  Ok(json!(RunReportResult {
    event_id: stored.event_id
  }))
}

async fn tail(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunTailParams = params.parse()?;
  let wait = Duration::from_millis(p.wait_ms.unwrap_or(DEFAULT_TAIL_WAIT_MS).min(MAX_TAIL_WAIT_MS));
  let frames = ctx
    .orchestrator
    .tail(&p.run_id, p.after, wait)
    .await
    .map_err(rpc_error)?;
  Ok(json!(FramesResponse { frames }))
}
