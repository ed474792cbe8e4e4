//! Transport layer: the narrow interface every resource client and model call goes through.
//!
//! [`Transport`] is the seam tests replace with a scripted in-memory implementation;
//! [`HttpTransport`] speaks the REST surface over reqwest.

pub mod http;
pub(crate) mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::client::RequestOptions;
use crate::{BoxStream, Result};

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One REST call relative to the API version root, e.g. `models/gemini-pro:generateContent`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Adds the pair only when `value` is present.
    pub fn with_optional_query(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.with_query(key, v),
            None => self,
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A single-request multipart file upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// The `{"file": {...}}` metadata document.
    pub metadata: Value,
    pub bytes: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and decode the JSON response body. Empty bodies decode as `{}`.
    async fn unary(&self, call: ApiCall, options: &RequestOptions) -> Result<Value>;

    /// Issue a server-streaming request; each item is one decoded response chunk.
    async fn stream(
        &self,
        call: ApiCall,
        options: &RequestOptions,
    ) -> Result<BoxStream<'static, Value>>;

    /// Upload a file's metadata and bytes in one request.
    async fn upload(&self, upload: FileUpload, options: &RequestOptions) -> Result<Value>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(Arc<reqwest::Error>),

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Stream was cancelled")]
    Cancelled,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection-level failures and timeouts may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(Arc::new(e))
    }
}

impl From<reqwest::Error> for crate::Error {
    fn from(e: reqwest::Error) -> Self {
        crate::Error::Transport(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_call_builders() {
        let call = ApiCall::post("models/m:generateContent", json!({"contents": []}))
            .with_query("alt", "sse")
            .with_optional_query("pageSize", None::<u32>)
            .with_optional_query("pageToken", Some("t"));
        assert_eq!(call.method, Method::Post);
        assert_eq!(call.query_value("alt"), Some("sse"));
        assert_eq!(call.query_value("pageSize"), None);
        assert_eq!(call.query_value("pageToken"), Some("t"));
    }

    #[test]
    fn test_protocol_errors_are_not_retryable() {
        assert!(!TransportError::Protocol("bad frame".into()).is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
    }
}
