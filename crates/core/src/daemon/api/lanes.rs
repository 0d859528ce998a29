use std::sync::Arc;

use jsonrpsee::core::RpcResult;
use jsonrpsee::server::RpcModule;
use jsonrpsee::types::Params;
use serde_json::{Value, json};
use tracing::info;

use super::rpc_error;
use crate::daemon::DaemonState;
use crate::rpc::{CommitResult, LaneCommitParams, LaneParams, MergeEnqueueParams, RunIdParams, TouchedFilesResult};

/// Register lane and merge queue APIs: lane.ensure, lane.touched, lane.commit,
/// merge.enqueue, merge.process.
pub fn register(module: &mut RpcModule<DaemonState>) {
  module
    .register_async_method("lane.ensure", |params, ctx, _ext| ensure(params, ctx))
    .expect("register lane.ensure");
  module
    .register_async_method("lane.touched", |params, ctx, _ext| touched(params, ctx))
    .expect("register lane.touched");
  module
    .register_async_method("lane.commit", |params, ctx, _ext| commit(params, ctx))
    .expect("register lane.commit");
  module
    .register_async_method("merge.enqueue", |params, ctx, _ext| enqueue(params, ctx))
    .expect("register merge.enqueue");
  module
    .register_async_method("merge.process", |params, ctx, _ext| process(params, ctx))
    .expect("register merge.process");
}

async fn ensure(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: LaneParams = params.parse()?;
  let lane = ctx
    .orchestrator
    .ensure_lane(&p.run_id, &p.agent_id)
    .await
    .map_err(rpc_error)?;
  Ok(json!(lane))
}

async fn touched(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: LaneParams = params.parse()?;
  let files = ctx
    .orchestrator
    .touched_files(&p.run_id, &p.agent_id)
    .await
    .map_err(rpc_error)?;
  Ok(json!(TouchedFilesResult { files }))
}

async fn commit(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: LaneCommitParams = params.parse()?;
  let hash = ctx
    .orchestrator
    .commit(&p.run_id, &p.agent_id, &p.message)
    .await
    .map_err(rpc_error)?;
  Ok(json!(CommitResult { hash }))
}

async fn enqueue(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: MergeEnqueueParams = params.parse()?;
  let item = ctx
    .orchestrator
    .enqueue_merge(&p.run_id, p.request)
    .await
    .map_err(rpc_error)?;
  info!(event = "merge_enqueued", run_id = %p.run_id, from = %item.from_branch, into = %item.into_branch);
  Ok(json!(item))
}

async fn process(params: Params<'static>, ctx: Arc<DaemonState>) -> RpcResult<Value> {
  let p: RunIdParams = params.parse()?;
  let report = ctx
    .orchestrator
    .process_merges(&p.run_id)
    .await
    .map_err(rpc_error)?;
  Ok(json!(report))
}
