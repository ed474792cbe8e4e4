//! Server-streaming response with one-chunk lookahead, replay and deferred errors.
//!
//! Every chunk fetched from the upstream is buffered and folded into an accumulated
//! response. Any number of [`StreamingResponse::chunks`] streams may be opened; each keeps
//! its own cursor into the shared buffer, so a stream opened late replays from the start.
//!
//! A chunk is handed out only once the fetch of the chunk after it has been attempted. A
//! failed fetch is stored and surfaced after the buffered chunks, so callers always see the
//! content that arrived before the failure.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::{stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use super::{accumulate, GenerationResponse};
use crate::types::{Candidate, GenerateContentResponse, Part, PromptFeedback, UsageMetadata};
use crate::{BoxStream, Error, Result};

#[derive(Default)]
struct State {
    chunks: Vec<GenerateContentResponse>,
    accumulated: GenerateContentResponse,
    done: bool,
    cancelled: bool,
    error: Option<Error>,
    blocked: Option<PromptFeedback>,
}

impl State {
    fn push(&mut self, chunk: GenerateContentResponse) {
        accumulate(&mut self.accumulated, &chunk);
        let blocked = chunk
            .prompt_feedback
            .as_ref()
            .filter(|f| f.is_blocked())
            .cloned();
        self.chunks.push(chunk);

        if let Some(feedback) = blocked {
            self.blocked = Some(feedback.clone());
            self.fail(Error::BlockedPrompt { feedback });
        } else if let Some(candidate) = self.accumulated.first_unclean_candidate() {
            let candidate = Box::new(candidate.clone());
            self.fail(Error::StopCandidate { candidate });
        }
    }

    fn fail(&mut self, error: Error) {
        debug!(error = %error, chunks = self.chunks.len(), "streaming response ended with an error");
        self.error = Some(error);
        self.done = true;
    }
}

struct Inner {
    upstream: tokio::sync::Mutex<Option<BoxStream<'static, Value>>>,
    state: Mutex<State>,
}

/// Handle over a server-streaming `generateContent` call.
///
/// Clones share the same buffer and upstream. The upstream is closed when it is exhausted,
/// when the response is [cancelled](Self::cancel), or when the last handle is dropped.
#[derive(Clone)]
pub struct StreamingResponse {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StreamingResponse")
            .field("chunks", &state.chunks.len())
            .field("done", &state.done)
            .field("cancelled", &state.cancelled)
            .field("error", &state.error)
            .finish()
    }
}

enum Step {
    Yield(GenerateContentResponse),
    Fail(Error),
    End,
    Fetch,
}

impl StreamingResponse {
    /// Wrap a stream of raw response chunks. The first chunk is fetched before returning so
    /// that a blocked prompt is visible immediately.
    pub async fn from_stream(upstream: BoxStream<'static, Value>) -> Self {
        let response = Self {
            inner: Arc::new(Inner {
                upstream: tokio::sync::Mutex::new(Some(upstream)),
                state: Mutex::new(State::default()),
            }),
        };
        response.advance().await;
        response
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch one more item from the upstream and commit it to the buffer.
    async fn advance(&self) {
        let mut upstream = self.inner.upstream.lock().await;
        if self.state().done {
            *upstream = None;
            return;
        }
        let item = match upstream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };

        let mut state = self.state();
        if state.cancelled {
            *upstream = None;
            return;
        }
        match item {
            Some(Ok(value)) => match serde_json::from_value::<GenerateContentResponse>(value) {
                Ok(chunk) => state.push(chunk),
                Err(e) => state.fail(Error::protocol(format!(
                    "stream chunk is not a GenerateContentResponse: {}",
                    e
                ))),
            },
            Some(Err(e)) => state.fail(e),
            None => {
                state.done = true;
                if state.chunks.is_empty() {
                    warn!("streaming response ended without any chunk");
                }
            }
        }
        if state.done {
            *upstream = None;
        }
    }

    fn step(&self, cursor: usize) -> Step {
        let state = self.state();
        let buffered = state.chunks.len();
        if cursor < buffered && (cursor + 1 < buffered || state.done) {
            Step::Yield(state.chunks[cursor].clone())
        } else if state.done {
            match &state.error {
                Some(e) => Step::Fail(e.clone()),
                None => Step::End,
            }
        } else {
            Step::Fetch
        }
    }

    /// A fresh single-pass stream over the chunks, replaying anything already buffered.
    ///
    /// A stored error is yielded once, after the buffered chunks, and ends the stream.
    pub fn chunks(&self) -> BoxStream<'static, GenerationResponse> {
        let this = self.clone();
        Box::pin(stream::unfold(
            (this, 0usize, false),
            |(this, cursor, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    match this.step(cursor) {
                        Step::Yield(chunk) => {
                            let item = Ok(GenerationResponse::from_raw(chunk));
                            return Some((item, (this, cursor + 1, false)));
                        }
                        Step::Fail(e) => return Some((Err(e), (this, cursor, true))),
                        Step::End => return None,
                        Step::Fetch => this.advance().await,
                    }
                }
            },
        ))
    }

    /// Drain the upstream. Returns the stored error, if the stream ended with one.
    pub async fn resolve(&self) -> Result<()> {
        while !self.is_done() {
            self.advance().await;
        }
        match self.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the upstream. Buffered chunks stay readable and the response reports done.
    pub fn cancel(&self) {
        {
            let mut state = self.state();
            if state.done && state.cancelled {
                return;
            }
            state.cancelled = true;
            state.done = true;
        }
        // A concurrent `advance` holding the lock drops the upstream itself once it sees
        // the cancelled flag.
        if let Ok(mut upstream) = self.inner.upstream.try_lock() {
            *upstream = None;
        }
        debug!("streaming response cancelled");
    }

    pub fn is_done(&self) -> bool {
        self.state().done
    }

    pub fn is_cancelled(&self) -> bool {
        self.state().cancelled
    }

    /// The error the stream ended with, if any.
    pub fn error(&self) -> Option<Error> {
        self.state().error.clone()
    }

    pub fn buffered_chunks(&self) -> usize {
        self.state().chunks.len()
    }

    /// The accumulated response so far, regardless of completion.
    pub fn snapshot(&self) -> GenerationResponse {
        GenerationResponse::from_raw(self.state().accumulated.clone())
    }

    fn completed(&self) -> Result<GenerationResponse> {
        let state = self.state();
        if let Some(feedback) = &state.blocked {
            return Err(Error::BlockedPrompt {
                feedback: feedback.clone(),
            });
        }
        if !state.done {
            return Err(Error::IncompleteIteration);
        }
        Ok(GenerationResponse::from_raw(state.accumulated.clone()))
    }

    /// Accumulated text. Requires the stream to be drained.
    pub fn text(&self) -> Result<String> {
        self.completed()?.text()
    }

    pub fn parts(&self) -> Result<Vec<Part>> {
        Ok(self.completed()?.parts()?.to_vec())
    }

    /// Accumulated candidates. A blocked prompt is reported as soon as it is buffered.
    pub fn candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.completed()?.candidates().to_vec())
    }

    pub fn prompt_feedback(&self) -> Option<PromptFeedback> {
        self.state().accumulated.prompt_feedback.clone()
    }

    pub fn usage_metadata(&self) -> Option<UsageMetadata> {
        self.state().accumulated.usage_metadata.clone()
    }

    /// The accumulated response when the stream drained cleanly and was not cancelled.
    pub(crate) fn committable(&self) -> Result<GenerationResponse> {
        let response = self.completed()?;
        let state = self.state();
        if let Some(e) = &state.error {
            return Err(e.clone());
        }
        if state.cancelled {
            return Err(Error::Transport(crate::transport::TransportError::Cancelled));
        }
        Ok(response)
    }
}
