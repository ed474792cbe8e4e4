use crate::transport::TransportError;
use crate::types::{Candidate, PromptFeedback};
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "contents[1].parts", "generation_config.stop_sequences")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "content_coercion", "request_builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side error classes surfaced verbatim from the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKind {
    InvalidArgument,
    FailedPrecondition,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    Cancelled,
    DeadlineExceeded,
    Unavailable,
    Internal,
    Unknown,
}

impl RemoteKind {
    /// Canonical status name as it appears in `error.status` of an API error body.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::Cancelled => "CANCELLED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether a retry of the same request may succeed.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhausted | Self::DeadlineExceeded | Self::Unavailable | Self::Internal
        )
    }
}

impl std::fmt::Display for RemoteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the client.
///
/// Every variant is cheap to clone so that a streaming response can replay a stored
/// failure to each of its iterators.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid input: {message}{}", format_context(.context))]
    InvalidInput {
        message: String,
        context: ErrorContext,
    },

    #[error("Prompt was blocked: {}", describe_block(.feedback))]
    BlockedPrompt { feedback: PromptFeedback },

    #[error("Candidate stopped unexpectedly: {}", describe_stop(.candidate))]
    StopCandidate { candidate: Box<Candidate> },

    #[error("Streaming response was queried before iteration completed; drain it or call `resolve()` first")]
    IncompleteIteration,

    #[error("Chat session is broken by a previous failed turn (call `rewind()` to recover): {cause}")]
    BrokenResponse { cause: Box<Error> },

    #[error("Messages must alternate between user and model roles: {message}")]
    AuthorSequence { message: String },

    #[error("Function `{name}` failed: {message}")]
    FunctionExecution { name: String, message: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Remote error: HTTP {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: RemoteKind,
        message: String,
        retryable: bool,
        retry_after_ms: Option<u32>,
    },

    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(Arc::new(e))
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn describe_block(feedback: &PromptFeedback) -> String {
    match &feedback.block_reason {
        Some(reason) => format!("{:?}", reason),
        None => "unspecified reason".to_string(),
    }
}

fn describe_stop(candidate: &Candidate) -> String {
    match &candidate.finish_reason {
        Some(reason) => format!("candidate {} finished with {:?}", candidate.index(), reason),
        None => format!("candidate {} finished without a reason", candidate.index()),
    }
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new validation error with structured context
    pub fn invalid_input_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidInput {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn author_sequence(msg: impl Into<String>) -> Self {
        Error::AuthorSequence {
            message: msg.into(),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Transport(TransportError::Protocol(msg.into()))
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidInput { context, .. } | Error::Configuration { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// The server error class, for errors surfaced from the API.
    pub fn remote_kind(&self) -> Option<RemoteKind> {
        match self {
            Error::Remote { kind, .. } => Some(*kind),
            Error::BrokenResponse { cause } => cause.remote_kind(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.remote_kind() == Some(RemoteKind::NotFound)
    }

    pub fn is_already_exists(&self) -> bool {
        self.remote_kind() == Some(RemoteKind::AlreadyExists)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.remote_kind() == Some(RemoteKind::PermissionDenied)
    }

    pub fn is_resource_exhausted(&self) -> bool {
        self.remote_kind() == Some(RemoteKind::ResourceExhausted)
    }

    /// Whether the failure is worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Remote { retryable, .. } => *retryable,
            Error::Transport(t) => t.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockReason, FinishReason};

    #[test]
    fn test_context_is_rendered() {
        let err = Error::invalid_input_with_context(
            "too many stop sequences",
            ErrorContext::new()
                .with_field_path("generation_config.stop_sequences")
                .with_source("generation_config"),
        );
        let msg = err.to_string();
        assert!(msg.contains("too many stop sequences"));
        assert!(msg.contains("field: generation_config.stop_sequences"));
        assert!(msg.contains("source: generation_config"));
    }

    #[test]
    fn test_broken_response_exposes_cause() {
        let cause = Error::BlockedPrompt {
            feedback: PromptFeedback {
                block_reason: Some(BlockReason::Safety),
                safety_ratings: Vec::new(),
            },
        };
        let err = Error::BrokenResponse {
            cause: Box::new(cause),
        };
        assert!(err.to_string().contains("Safety"));
    }

    #[test]
    fn test_stop_candidate_message() {
        let candidate = Candidate {
            index: Some(2),
            finish_reason: Some(FinishReason::Recitation),
            ..Default::default()
        };
        let err = Error::StopCandidate {
            candidate: Box::new(candidate),
        };
        assert!(err.to_string().contains("candidate 2"));
    }

    #[test]
    fn test_remote_kind_helpers() {
        let err = Error::Remote {
            status: 404,
            kind: RemoteKind::NotFound,
            message: "missing".into(),
            retryable: false,
            retry_after_ms: None,
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(RemoteKind::Unavailable.retryable());
    }
}
