//! Long-running operations (tuned-model creation).
//!
//! An [`Operation`] wraps the server's `operations/...` resource. Its state only moves
//! forward: `Pending -> Running -> {Succeeded, Failed, Cancelled}`.

use std::marker::PhantomData;
use std::time::Duration;

use futures::stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::error_classification::classify_operation_error;
use crate::client::{Client, RequestOptions, RetryPolicy};
use crate::transport::{ApiCall, TransportError};
use crate::{BoxStream, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed | OperationState::Cancelled
        )
    }
}

/// Wire form of `google.longrunning.Operation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// Tuning progress reported in operation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TuningProgress {
    #[serde(default)]
    pub tuned_model: Option<String>,
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default)]
    pub completed_steps: u32,
    #[serde(default)]
    pub completed_percent: f32,
    #[serde(default)]
    pub snapshots: Vec<TuningSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TuningSnapshot {
    #[serde(default)]
    pub step: u32,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default)]
    pub mean_loss: f32,
    #[serde(default)]
    pub compute_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Handle to a long-running operation whose result decodes into `T`.
pub struct Operation<T> {
    client: Client,
    snapshot: OperationSnapshot,
    cancelled: bool,
    poll: RetryPolicy,
    request_options: RequestOptions,
    _result: PhantomData<fn() -> T>,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            snapshot: self.snapshot.clone(),
            cancelled: self.cancelled,
            poll: self.poll.clone(),
            request_options: self.request_options.clone(),
            _result: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.snapshot.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Operation<T> {
    pub fn name(&self) -> &str {
        &self.snapshot.name
    }

    pub fn snapshot(&self) -> &OperationSnapshot {
        &self.snapshot
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn state(&self) -> OperationState {
        if self.cancelled {
            return OperationState::Cancelled;
        }
        if self.snapshot.done {
            return match &self.snapshot.error {
                Some(status) if status.get("code").and_then(Value::as_i64) == Some(1) => {
                    OperationState::Cancelled
                }
                Some(_) => OperationState::Failed,
                None => OperationState::Succeeded,
            };
        }
        match self.metadata() {
            Some(p) if p.completed_steps > 0 => OperationState::Running,
            _ => OperationState::Pending,
        }
    }

    /// Progress from the last fetched snapshot.
    pub fn metadata(&self) -> Option<TuningProgress> {
        self.snapshot
            .metadata
            .as_ref()
            .and_then(|m| serde_json::from_value(m.clone()).ok())
    }
}

impl<T: DeserializeOwned + Send + 'static> Operation<T> {
    pub(crate) fn from_value(client: Client, raw: Value) -> Result<Self> {
        let snapshot: OperationSnapshot = serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("malformed operation: {}", e)))?;
        Ok(Self {
            client,
            snapshot,
            cancelled: false,
            poll: RetryPolicy::default()
                .with_initial_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60)),
            request_options: RequestOptions::default(),
            _result: PhantomData,
        })
    }

    /// Polling schedule used by [`wait`](Self::wait) and [`progress`](Self::progress).
    pub fn with_poll_policy(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Fetch the current snapshot once. Never blocks on completion.
    pub async fn refresh(&mut self) -> Result<OperationState> {
        if self.is_done() {
            return Ok(self.state());
        }
        let raw = self
            .client
            .transport()
            .unary(ApiCall::get(self.snapshot.name.clone()), &self.request_options)
            .await?;
        self.snapshot = serde_json::from_value(raw)
            .map_err(|e| Error::protocol(format!("malformed operation: {}", e)))?;
        let state = self.state();
        debug!(operation = %self.snapshot.name, ?state, "refreshed operation");
        Ok(state)
    }

    /// The decoded result: `None` while unfinished, the remote error when it failed.
    pub fn result(&self) -> Result<Option<T>> {
        match self.state() {
            OperationState::Succeeded => {
                let response = self.snapshot.response.clone().unwrap_or(Value::Null);
                let decoded = serde_json::from_value(response).map_err(|e| {
                    Error::protocol(format!("operation result does not decode: {}", e))
                })?;
                Ok(Some(decoded))
            }
            OperationState::Failed | OperationState::Cancelled => {
                let status = self
                    .snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| json!({"code": 1, "message": "operation was cancelled"}));
                Err(classify_operation_error(&status))
            }
            OperationState::Pending | OperationState::Running => Ok(None),
        }
    }

    /// Poll with exponential backoff until the operation finishes or `timeout` elapses.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut attempt = 0u32;
        loop {
            self.refresh().await?;
            if let Some(result) = self.result()? {
                info!(operation = %self.snapshot.name, "operation finished");
                return Ok(result);
            }
            let mut delay = self.poll.backoff_delay(attempt, None);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Transport(TransportError::Timeout(format!(
                        "operation {} did not finish in time",
                        self.snapshot.name
                    ))));
                }
                delay = delay.min(deadline - now);
            }
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// A stream of progress snapshots, one per poll that observed a change, ending when the
    /// operation finishes. A failed operation ends the stream with its error.
    pub fn progress(&self) -> BoxStream<'static, TuningProgress> {
        let op = self.clone();
        Box::pin(stream::unfold(
            (op, 0u32, None::<TuningProgress>, false),
            |(mut op, mut attempt, mut last, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Err(e) = op.refresh().await {
                        return Some((Err(e), (op, attempt, last, true)));
                    }
                    let current = op.metadata().unwrap_or_default();
                    let done = op.is_done();
                    if done {
                        if let Err(e) = op.result() {
                            return Some((Err(e), (op, attempt, last, true)));
                        }
                    }
                    if last.as_ref() != Some(&current) {
                        last = Some(current.clone());
                        return Some((Ok(current), (op, attempt, last, done)));
                    }
                    if done {
                        return None;
                    }
                    tokio::time::sleep(op.poll.backoff_delay(attempt, None)).await;
                    attempt = attempt.saturating_add(1);
                }
            },
        ))
    }

    /// Ask the server to cancel. The local handle reports `Cancelled` from now on.
    pub async fn cancel(&mut self) -> Result<()> {
        if self.is_done() {
            return Ok(());
        }
        let path = format!("{}:cancel", self.snapshot.name);
        self.client
            .transport()
            .unary(ApiCall::post(path, json!({})), &self.request_options)
            .await?;
        self.cancelled = true;
        info!(operation = %self.snapshot.name, "operation cancelled");
        Ok(())
    }
}
