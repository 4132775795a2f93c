//! Worker dispatch (C5): the "Worker" node handler's callback-out half and
//! the wire contract a dispatched worker must honor.
//!
//! Concrete worker implementations (Claude, Stripe, ...) are out of scope;
//! [`WorkerDispatcher`] is the seam a collaborator plugs into.
//! [`HttpWorkerDispatcher`] is the one concrete instantiation this crate
//! ships: it POSTs the node's resolved input plus a `callback_url` to the
//! node's declared `endpoint`. A synchronous worker's response is awaited
//! inline; an asynchronous worker's POST is fired without waiting, and
//! completion arrives later via `POST /callback/{run_id}/{node_id}`.

use async_trait::async_trait;
use serde_json::Value;

/// Outcome of dispatching to a worker.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
  /// A synchronous worker returned its output inline.
  Completed { output: Value },
  /// A synchronous worker reported failure inline, or an async dispatch
  /// could not even be sent (e.g. no endpoint configured).
  Failed { error: String },
  /// An asynchronous worker accepted the dispatch; completion will arrive
  /// out of band via the callback protocol (C6).
  Dispatched,
}

#[derive(Debug, Clone)]
pub struct WorkerDispatchRequest {
  pub run_id: String,
  pub node_id: String,
  pub is_async: bool,
  pub endpoint: Option<String>,
  pub input: Value,
  pub callback_url: String,
  pub timeout_ms: Option<u64>,
}

#[async_trait]
pub trait WorkerDispatcher: Send + Sync {
  async fn dispatch(&self, request: WorkerDispatchRequest) -> DispatchOutcome;
}

/// Dispatches over HTTP via `reqwest`. Synchronous workers block on the
/// response; asynchronous workers are spawned as fire-and-forget tasks —
/// the handler returns immediately after dispatch and the rest of the
/// walk resumes on callback.
pub struct HttpWorkerDispatcher {
  client: reqwest::Client,
}

impl Default for HttpWorkerDispatcher {
  fn default() -> Self {
    Self::new()
  }
}

impl HttpWorkerDispatcher {
  pub fn new() -> Self {
    Self {
      client: reqwest::Client::new(),
    }
  }
}

#[async_trait]
impl WorkerDispatcher for HttpWorkerDispatcher {
  #[tracing::instrument(skip(self, request), fields(run_id = %request.run_id, node_id = %request.node_id, is_async = request.is_async))]
  async fn dispatch(&self, request: WorkerDispatchRequest) -> DispatchOutcome {
    let Some(endpoint) = request.endpoint.clone() else {
      return DispatchOutcome::Failed {
        error: "worker node has no endpoint configured".to_string(),
      };
    };

    let body = serde_json::json!({
      "input": request.input,
      "callback_url": request.callback_url,
    });

    if request.is_async {
      let client = self.client.clone();
      tokio::spawn(async move {
        if let Err(err) = client.post(&endpoint).json(&body).send().await {
          tracing::warn!(%endpoint, error = %err, "async worker dispatch failed to send");
        }
      });
      return DispatchOutcome::Dispatched;
    }

    let mut req = self.client.post(&endpoint).json(&body);
    if let Some(timeout_ms) = request.timeout_ms {
      req = req.timeout(std::time::Duration::from_millis(timeout_ms));
    }

    match req.send().await {
      Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
        Ok(output) => DispatchOutcome::Completed { output },
        Err(err) => DispatchOutcome::Failed {
          error: format!("worker returned non-JSON response: {err}"),
        },
      },
      Ok(resp) => DispatchOutcome::Failed {
        error: format!("worker responded with status {}", resp.status()),
      },
      Err(err) if err.is_timeout() => DispatchOutcome::Failed {
        error: "timeout".to_string(),
      },
      Err(err) => DispatchOutcome::Failed {
        error: err.to_string(),
      },
    }
  }
}
