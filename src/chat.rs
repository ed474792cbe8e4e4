//! Multi-turn chat on top of a shared [`GenerativeModel`].
//!
//! A session is in one of three states:
//!
//! * **Ready**: history is committed; the next send may proceed.
//! * **Streaming**: a streamed reply is outstanding. It is committed on the next access once
//!   the caller has drained it and every candidate finished cleanly.
//! * **Broken**: the outstanding stream failed. Every access raises
//!   [`Error::BrokenResponse`] until [`ChatSession::rewind`] drops the failed turn.
//!
//! Unary sends either commit or leave the session untouched.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::coerce::{to_content, ContentInput};
use crate::model::GenerativeModel;
use crate::response::{GenerationResponse, StreamingResponse};
use crate::types::{Content, Part, Role};
use crate::{Error, ErrorContext, Result};

pub const DEFAULT_MAX_FUNCTION_CALL_TURNS: usize = 10;

#[derive(Debug)]
struct Pending {
    sent: Content,
    response: StreamingResponse,
}

#[derive(Debug)]
pub struct ChatSession {
    model: Arc<GenerativeModel>,
    history: Vec<Content>,
    pending: Option<Pending>,
    broken: Option<Error>,
    last: Option<GenerationResponse>,
    automatic_function_calling: bool,
    max_function_call_turns: usize,
}

fn check_alternation(history: &[Content]) -> Result<()> {
    for (i, content) in history.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Model };
        match content.role {
            Some(role) if role == expected => {}
            Some(role) => {
                return Err(Error::author_sequence(format!(
                    "history[{}] has role `{}`, expected `{}`",
                    i,
                    role.as_str(),
                    expected.as_str()
                )))
            }
            None => {
                return Err(Error::author_sequence(format!(
                    "history[{}] has no role, expected `{}`",
                    i,
                    expected.as_str()
                )))
            }
        }
    }
    Ok(())
}

impl ChatSession {
    pub(crate) fn new(model: Arc<GenerativeModel>, history: Vec<Content>) -> Result<Self> {
        check_alternation(&history)?;
        Ok(Self {
            model,
            history,
            pending: None,
            broken: None,
            last: None,
            automatic_function_calling: false,
            max_function_call_turns: DEFAULT_MAX_FUNCTION_CALL_TURNS,
        })
    }

    /// Let unary sends execute function calls locally through the model's callable tools.
    pub fn enable_automatic_function_calling(mut self) -> Self {
        self.automatic_function_calling = true;
        self
    }

    pub fn with_max_function_call_turns(mut self, turns: usize) -> Self {
        self.max_function_call_turns = turns;
        self
    }

    pub fn model(&self) -> &Arc<GenerativeModel> {
        &self.model
    }

    fn broken_error(cause: &Error) -> Error {
        Error::BrokenResponse {
            cause: Box::new(cause.clone()),
        }
    }

    /// Resolve the outstanding streamed turn, if any.
    fn settle(&mut self) -> Result<()> {
        if let Some(cause) = &self.broken {
            return Err(Self::broken_error(cause));
        }
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        if pending.response.is_cancelled() {
            debug!("discarding cancelled streamed turn");
            self.pending = None;
            return Ok(());
        }
        if !pending.response.is_done() {
            return Err(Error::IncompleteIteration);
        }
        let committed = pending
            .response
            .committable()
            .and_then(|response| Ok((response.model_content()?, response)));
        match committed {
            Ok((model_content, response)) => {
                if let Some(pending) = self.pending.take() {
                    self.history.push(pending.sent);
                    self.history.push(model_content);
                }
                self.last = Some(response);
                Ok(())
            }
            Err(cause) => {
                warn!(error = %cause, "streamed turn failed; chat session needs rewind");
                let err = Self::broken_error(&cause);
                self.broken = Some(cause);
                Err(err)
            }
        }
    }

    fn outgoing(&self, content: ContentInput) -> Result<Content> {
        let mut content = to_content(content)?;
        match content.role {
            None | Some(Role::User) => {
                content.role = Some(Role::User);
                Ok(content)
            }
            Some(other) => Err(Error::author_sequence(format!(
                "messages sent to a chat must have the `user` role, got `{}`",
                other.as_str()
            ))),
        }
    }

    fn request_contents(&self, turns: &[Content]) -> Vec<Content> {
        self.history.iter().chain(turns).cloned().collect()
    }

    /// Send one message and wait for the full reply.
    ///
    /// Blocked prompts, unclean finishes and transport failures are returned as errors and
    /// leave history unchanged. With automatic function calling enabled, function calls the
    /// model's library can execute are answered locally and the exchange continues.
    pub async fn send(&mut self, content: impl Into<ContentInput>) -> Result<GenerationResponse> {
        self.settle()?;
        let model = Arc::clone(&self.model);
        let mut turns = vec![self.outgoing(content.into())?];
        let mut function_turns = 0usize;

        loop {
            let response = model
                .generate_content(self.request_contents(&turns))
                .await?;
            if response.error().is_none() && response.candidates().is_empty() {
                return Err(Error::protocol("the response contained no candidates"));
            }
            let reply = response.model_content()?;
            let calls: Vec<_> = reply.function_calls().cloned().collect();
            turns.push(reply);

            if !self.automatic_function_calling || calls.is_empty() {
                return Ok(self.commit(turns, response));
            }
            let Some(library) = model.tools() else {
                return Ok(self.commit(turns, response));
            };
            if calls.iter().any(|c| library.callable(&c.name).is_none()) {
                return Ok(self.commit(turns, response));
            }
            if function_turns >= self.max_function_call_turns {
                warn!(
                    turns = function_turns,
                    "automatic function calling stopped at the turn limit"
                );
                return Ok(self.commit(turns, response));
            }

            let mut parts: Vec<Part> = Vec::with_capacity(calls.len());
            for call in &calls {
                if let Some(result) = library.call(call) {
                    parts.push(result?);
                }
            }
            function_turns += 1;
            debug!(calls = calls.len(), turn = function_turns, "answered function calls");
            turns.push(Content::new(Role::User, parts));
        }
    }

    fn commit(&mut self, turns: Vec<Content>, response: GenerationResponse) -> GenerationResponse {
        self.history.extend(turns);
        self.last = Some(response.clone());
        response
    }

    /// Send one message and stream the reply. The turn is committed on the next session
    /// access once the returned stream has been drained cleanly.
    pub async fn send_stream(
        &mut self,
        content: impl Into<ContentInput>,
    ) -> Result<StreamingResponse> {
        self.settle()?;
        if self.automatic_function_calling {
            return Err(Error::invalid_input_with_context(
                "automatic function calling is not supported with streaming sends",
                ErrorContext::new().with_source("chat_session"),
            ));
        }
        let sent = self.outgoing(content.into())?;
        let response = self
            .model
            .generate_content_stream(self.request_contents(std::slice::from_ref(&sent)))
            .await?;
        self.pending = Some(Pending {
            sent,
            response: response.clone(),
        });
        Ok(response)
    }

    /// Committed history. Commits a drained stream first.
    pub fn history(&mut self) -> Result<&[Content]> {
        self.settle()?;
        Ok(&self.history)
    }

    /// Replace the history verbatim. Roles must alternate `user`, `model`, starting with
    /// `user`. Clears any outstanding or failed turn and the last response.
    pub fn set_history(&mut self, history: Vec<Content>) -> Result<()> {
        check_alternation(&history)?;
        self.history = history;
        self.pending = None;
        self.broken = None;
        self.last = None;
        Ok(())
    }

    /// The most recent committed reply.
    pub fn last(&mut self) -> Result<Option<&GenerationResponse>> {
        self.settle()?;
        Ok(self.last.as_ref())
    }

    /// Remove the most recent (user, model) pair and return it.
    ///
    /// On a broken session this drops the failed turn, whose model half is whatever was
    /// received before the failure.
    pub fn rewind(&mut self) -> Result<(Content, Content)> {
        match self.settle() {
            Ok(()) => {}
            Err(Error::BrokenResponse { .. }) => return self.drop_failed_turn(),
            Err(e) => return Err(e),
        }
        if self.history.len() < 2 {
            return Err(Error::invalid_input_with_context(
                "there is no exchange to rewind",
                ErrorContext::new()
                    .with_field_path("history")
                    .with_source("chat_session"),
            ));
        }
        let model = self.history.pop().unwrap_or_default();
        let user = self.history.pop().unwrap_or_default();
        self.last = None;
        Ok((user, model))
    }

    fn drop_failed_turn(&mut self) -> Result<(Content, Content)> {
        self.broken = None;
        self.last = None;
        let pending = self.pending.take().ok_or_else(|| {
            Error::invalid_input("the failed turn was already discarded")
        })?;
        let partial = pending
            .response
            .snapshot()
            .candidates()
            .first()
            .and_then(|c| c.content.clone())
            .unwrap_or_default()
            .with_role(Role::Model);
        debug!(history = self.history.len(), "rewound failed streamed turn");
        Ok((pending.sent, partial))
    }

    /// An independent session on the same model with a copy of the committed history.
    pub fn fork(&mut self) -> Result<ChatSession> {
        self.settle()?;
        Ok(ChatSession {
            model: Arc::clone(&self.model),
            history: self.history.clone(),
            pending: None,
            broken: None,
            last: self.last.clone(),
            automatic_function_calling: self.automatic_function_calling,
            max_function_call_turns: self.max_function_call_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternation_rules() {
        assert!(check_alternation(&[]).is_ok());
        assert!(check_alternation(&[Content::user("a"), Content::model("b")]).is_ok());
        assert!(matches!(
            check_alternation(&[Content::model("b")]),
            Err(Error::AuthorSequence { .. })
        ));
        assert!(matches!(
            check_alternation(&[Content::user("a"), Content::user("b")]),
            Err(Error::AuthorSequence { .. })
        ));
        let unroled = Content {
            role: None,
            parts: vec![Part::text("a")],
        };
        assert!(check_alternation(&[unroled]).is_err());
    }
}
