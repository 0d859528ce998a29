use std::path::Path;

use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, body::Bytes};
use hyper_util::client::legacy::{Client, Error as LegacyClientError};
use hyperlocal::UnixClientExt;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;
use weft_core::domain::RunSnapshot;
use weft_core::merge_queue::MergeReport;
use weft_core::orchestrator::RunDetails;
use weft_core::rpc::{
  DaemonStatus, FramesResponse, RunCancelParams, RunCreateParams, RunEventsParams, RunFinishParams,
  RunIdParams, RunListResponse, RunTailParams,
};

/// Reusable HTTP client for the daemon socket; `events --follow` polls through one session.
pub struct RpcSession {
  client: Client<hyperlocal::UnixConnector, Full<Bytes>>,
}

impl RpcSession {
  pub fn new() -> Self {
    Self {
      client: Client::unix(),
    }
  }

  pub async fn rpc_call(&self, sock: &Path, method: &str, params: Option<Value>) -> Result<Value> {
    let url = hyperlocal::Uri::new(sock, "/");
    let req_body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let req = Request::builder()
      .method(Method::POST)
      .uri(url)
      .header(hyper::header::CONTENT_TYPE, "application/json")
      .body(Full::<Bytes>::from(serde_json::to_vec(&req_body)?))
      .map_err(|e| Error::Request(e.to_string()))?;

    debug!(event = "rpc_call", method);
    let resp = self.client.request(req).await?;
    let status_code = resp.status();
    let bytes = resp.into_body().collect().await?.to_bytes();
    if !status_code.is_success() {
      return Err(Error::HttpStatus(
        status_code.as_u16(),
        String::from_utf8_lossy(&bytes).into(),
      ));
    }
    let v: Value = serde_json::from_slice(&bytes)?;
    if let Some(err) = v.get("error") {
      let code = err.get("code").and_then(|c| c.as_i64()).unwrap_or(-32000) as i32;
      let message = match err.get("message").and_then(|m| m.as_str()) {
        Some(m) => m.to_string(),
        None => err.to_string(),
      };
      return Err(Error::Rpc { code, message });
    }
    v.get("result").cloned().ok_or_else(|| Error::Rpc {
      code: -32000,
      message: "missing result".to_string(),
    })
  }

  async fn call<T: DeserializeOwned>(
    &self,
    sock: &Path,
    method: &str,
    params: impl serde::Serialize,
  ) -> Result<T> {
    let v = self
      .rpc_call(sock, method, Some(serde_json::to_value(params)?))
      .await?;
    Ok(serde_json::from_value(v)?)
  }

  pub async fn run_tail(
    &self,
    sock: &Path,
    run_id: &str,
    after: u64,
    wait_ms: u64,
  ) -> Result<FramesResponse> {
    let params = RunTailParams {
      run_id: run_id.to_string(),
      after,
      wait_ms: Some(wait_ms),
    };
    self.call(sock, "run.tail", params).await
  }

  pub async fn run_get(&self, sock: &Path, run_id: &str) -> Result<RunDetails> {
    self.call(sock, "run.get", run_id_params(run_id)).await
  }
}

impl Default for RpcSession {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("http: {0}")]
  Http(#[from] hyper::Error),
  #[error("request: {0}")]
  Request(String),
  #[error("client: {0}")]
  Client(#[from] LegacyClientError),
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
  #[error("rpc {code}: {message}")]
  Rpc { code: i32, message: String },
  #[error("http status {0}: {1}")]
  HttpStatus(u16, String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn run_id_params(run_id: &str) -> RunIdParams {
  RunIdParams {
    run_id: run_id.to_string(),
  }
}

pub async fn daemon_status(sock: &Path) -> Result<DaemonStatus> {
  let v = RpcSession::new().rpc_call(sock, "daemon.status", None).await?;
  Ok(serde_json::from_value(v)?)
}

pub async fn daemon_shutdown(sock: &Path) -> Result<()> {
  let _ = RpcSession::new()
    .rpc_call(sock, "daemon.shutdown", None)
    .await?;
  Ok(())
}

// ---- Run wrappers ----

pub async fn run_create(sock: &Path, package: Value) -> Result<RunSnapshot> {
  RpcSession::new()
    .call(sock, "run.create", RunCreateParams { package })
    .await
}

pub async fn run_list(sock: &Path) -> Result<RunListResponse> {
  RpcSession::new().call(sock, "run.list", json!({})).await
}

pub async fn run_get(sock: &Path, run_id: &str) -> Result<RunDetails> {
  RpcSession::new().run_get(sock, run_id).await
}

pub async fn run_cancel(sock: &Path, run_id: &str, reason: Option<String>) -> Result<RunSnapshot> {
  let params = RunCancelParams {
    run_id: run_id.to_string(),
    reason,
  };
  RpcSession::new().call(sock, "run.cancel", params).await
}

pub async fn run_finish(sock: &Path, params: RunFinishParams) -> Result<RunSnapshot> {
  RpcSession::new().call(sock, "run.finish", params).await
}

pub async fn run_events(sock: &Path, run_id: &str, after: u64) -> Result<FramesResponse> {
  let params = RunEventsParams {
    run_id: run_id.to_string(),
    after,
    limit: None,
  };
  RpcSession::new().call(sock, "run.events", params).await
}

pub async fn merge_process(sock: &Path, run_id: &str) -> Result<MergeReport> {
  RpcSession::new()
    .call(sock, "merge.process", run_id_params(run_id))
    .await
}
