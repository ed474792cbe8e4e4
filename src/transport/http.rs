use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::multipart::{Form, Part as MultipartPart};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{sse, ApiCall, FileUpload, Method, Transport, TransportError};
use crate::client::error_classification::{classify_error_value, classify_http, parse_retry_after};
use crate::client::{ClientOptions, RequestOptions, RetryPolicy};
use crate::{BoxStream, Error, ErrorContext, Result};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const API_VERSION: &str = "v1beta";
const REQUEST_ID_HEADER: &str = "x-genai-client-request-id";

/// REST transport over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    credentials: Option<String>,
    default_headers: Vec<(String, String)>,
    user_agent: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("has_credentials", &self.credentials.is_some())
            .finish()
    }
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let pool_max_idle = std::env::var("GENAI_HTTP_POOL_MAX_IDLE_PER_HOST")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(32);

        let client = reqwest::Client::builder()
            .timeout(options.timeout())
            .pool_max_idle_per_host(pool_max_idle)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        let base_url = options
            .endpoint_override
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        Url::parse(&base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid endpoint `{}`: {}", base_url, e),
                ErrorContext::new()
                    .with_field_path("endpoint_override")
                    .with_source("http_transport"),
            )
        })?;

        let mut user_agent = format!("genai-client-rust/{}", env!("CARGO_PKG_VERSION"));
        if let Some(suffix) = options.client_user_agent_suffix.as_deref() {
            user_agent.push(' ');
            user_agent.push_str(suffix);
        }

        Ok(Self {
            client,
            base_url,
            api_key: options.api_key.clone(),
            credentials: options.credentials.clone(),
            default_headers: options.default_metadata.clone(),
            user_agent,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, prefix: &str, call_path: &str, query: &[(String, String)]) -> Result<Url> {
        let raw = format!(
            "{}/{}{}/{}",
            self.base_url,
            prefix,
            API_VERSION,
            call_path.trim_start_matches('/')
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| Error::invalid_input(format!("invalid request path `{}`: {}", raw, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn headers(&self, options: &RequestOptions) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let mut insert = |name: &str, value: &str| -> Result<()> {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::invalid_input(format!("invalid header name `{}`: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::invalid_input(format!("invalid header value: {}", e)))?;
            headers.append(name, value);
            Ok(())
        };

        match (&self.api_key, &self.credentials) {
            (Some(key), _) => insert("x-goog-api-key", key)?,
            (None, Some(token)) => insert("authorization", &format!("Bearer {}", token))?,
            (None, None) => {
                return Err(Error::configuration_with_context(
                    "no API key or credentials configured",
                    ErrorContext::new()
                        .with_details(format!(
                            "set {} or pass an api_key to the client builder",
                            crate::client::options::API_KEY_ENV
                        ))
                        .with_source("http_transport"),
                ))
            }
        }
        insert("user-agent", &self.user_agent)?;
        insert("x-goog-api-client", &self.user_agent)?;
        insert(REQUEST_ID_HEADER, &uuid::Uuid::new_v4().to_string())?;
        for (k, v) in self.default_headers.iter().chain(options.extra_headers.iter()) {
            insert(k, v)?;
        }
        Ok(headers)
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder> {
        let builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        let mut builder = builder.headers(self.headers(options)?);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    async fn send_once(&self, call: &ApiCall, options: &RequestOptions) -> Result<Value> {
        let url = self.url("", &call.path, &call.query)?;
        debug!(method = call.method.as_str(), path = %call.path, "dispatching request");
        let mut req = self.request(call.method, url, options)?;
        if let Some(body) = &call.body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        decode_json(resp).await
    }

    async fn with_retry<F, Fut>(&self, policy: Option<&RetryPolicy>, mut attempt_fn: F) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Value>>,
    {
        let policy = policy.cloned().unwrap_or_else(RetryPolicy::none);
        let mut attempt = 0u32;
        loop {
            match attempt_fn().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let retry_after = match &e {
                        Error::Remote { retry_after_ms, .. } => *retry_after_ms,
                        _ => None,
                    };
                    let delay = policy.backoff_delay(attempt, retry_after);
                    warn!(attempt, ?delay, error = %e, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    classify_http(status, &body, retry_after)
}

async fn decode_json(resp: reqwest::Response) -> Result<Value> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    let bytes = resp.bytes().await?;
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::protocol(format!("response body is not valid JSON: {}", e)))
}

/// A JSON frame carrying `error` ends the stream with the classified failure.
fn check_frame(frame: Value) -> Result<Value> {
    if frame.get("error").is_some() {
        return Err(classify_error_value(None, &frame, None));
    }
    Ok(frame)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn unary(&self, call: ApiCall, options: &RequestOptions) -> Result<Value> {
        self.with_retry(options.retry.as_ref(), || self.send_once(&call, options))
            .await
    }

    async fn stream(
        &self,
        call: ApiCall,
        options: &RequestOptions,
    ) -> Result<BoxStream<'static, Value>> {
        let mut query = call.query.clone();
        if !query.iter().any(|(k, _)| k == "alt") {
            query.push(("alt".to_string(), "sse".to_string()));
        }
        let url = self.url("", &call.path, &query)?;
        debug!(path = %call.path, "opening stream");
        let mut req = self
            .request(call.method, url, options)?
            .header("accept", "text/event-stream");
        if let Some(body) = &call.body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let bytes: BoxStream<'static, Bytes> =
            Box::pin(resp.bytes_stream().map_err(Error::from));
        let frames = sse::decode(bytes).map(|item| item.and_then(check_frame));
        Ok(Box::pin(frames))
    }

    async fn upload(&self, upload: FileUpload, options: &RequestOptions) -> Result<Value> {
        let url = self.url(
            "upload/",
            "files",
            &[("uploadType".to_string(), "multipart".to_string())],
        )?;
        debug!(mime_type = %upload.mime_type, size = upload.bytes.len(), "uploading file");

        let metadata = MultipartPart::text(upload.metadata.to_string())
            .mime_str("application/json")
            .map_err(|e| Error::invalid_input(format!("invalid metadata part: {}", e)))?;
        let file = MultipartPart::bytes(upload.bytes.to_vec())
            .mime_str(&upload.mime_type)
            .map_err(|e| {
                Error::invalid_input(format!("invalid mime type `{}`: {}", upload.mime_type, e))
            })?;
        let form = Form::new().part("metadata", metadata).part("file", file);

        let resp = self
            .request(Method::Post, url, options)?
            .header("x-goog-upload-protocol", "multipart")
            .multipart(form)
            .send()
            .await?;
        decode_json(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(&ClientOptions {
            api_key: Some("k".into()),
            endpoint_override: Some("http://localhost:1234/".into()),
            client_user_agent_suffix: Some("app/1".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_building() {
        let t = transport();
        let url = t
            .url(
                "",
                "models/gemini-pro:generateContent",
                &[("alt".into(), "sse".into())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:1234/v1beta/models/gemini-pro:generateContent?alt=sse"
        );
        let upload = t.url("upload/", "files", &[]).unwrap();
        assert_eq!(upload.as_str(), "http://localhost:1234/upload/v1beta/files");
    }

    #[test]
    fn test_headers_carry_key_and_agent() {
        let t = transport();
        let headers = t
            .headers(&RequestOptions::new().header("x-extra", "1"))
            .unwrap();
        assert_eq!(headers["x-goog-api-key"], "k");
        assert!(headers["user-agent"].to_str().unwrap().ends_with(" app/1"));
        assert_eq!(headers["x-extra"], "1");
        assert!(headers.contains_key(REQUEST_ID_HEADER));
    }

    #[test]
    fn test_missing_credentials_fail_at_call_time() {
        let t = HttpTransport::new(&ClientOptions::default()).unwrap();
        let err = t.headers(&RequestOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_error_frame_is_classified() {
        let frame = serde_json::json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}});
        assert!(check_frame(frame).unwrap_err().is_resource_exhausted());
    }
}
