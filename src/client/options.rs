//! Client-wide and per-call configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::RetryPolicy;
use crate::{Error, ErrorContext, Result};

/// Environment variable consulted for the API key when none is configured.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";
/// Environment variable overriding the default transport timeout, in seconds.
pub const TIMEOUT_ENV: &str = "GENAI_HTTP_TIMEOUT_SECS";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Wire protocol used to reach the service. Only REST is implemented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Rest,
    Grpc,
    GrpcAsyncio,
}

/// Client configuration, loadable from YAML.
///
/// ```yaml
/// api_key: "..."
/// transport: rest
/// endpoint_override: "http://localhost:8080"
/// default_metadata:
///   - ["x-team", "search"]
/// client_user_agent_suffix: "my-app/1.2"
/// timeout_secs: 30
/// ```
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub api_key: Option<String>,
    /// Opaque bearer token minted elsewhere.
    pub credentials: Option<String>,
    pub transport: TransportKind,
    pub endpoint_override: Option<String>,
    pub default_metadata: Vec<(String, String)>,
    pub client_user_agent_suffix: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ClientOptions")
            .field("api_key", &redact(&self.api_key))
            .field("credentials", &redact(&self.credentials))
            .field("transport", &self.transport)
            .field("endpoint_override", &self.endpoint_override)
            .field("default_metadata", &self.default_metadata)
            .field("client_user_agent_suffix", &self.client_user_agent_suffix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid client options: {}", e),
                ErrorContext::new().with_source("client_options"),
            )
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read client options: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("client_options"),
            )
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Fill unset fields from the environment.
    pub fn with_env_fallback(mut self) -> Self {
        if self.api_key.is_none() {
            self.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        if self.timeout_secs.is_none() {
            self.timeout_secs = std::env::var(TIMEOUT_ENV)
                .ok()
                .and_then(|s| s.parse::<u64>().ok());
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// Per-call knobs forwarded to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub extra_headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_options() {
        let opts = ClientOptions::from_yaml_str(
            r#"
api_key: secret
transport: grpc_asyncio
default_metadata:
  - ["x-team", "search"]
timeout_secs: 5
"#,
        )
        .unwrap();
        assert_eq!(opts.api_key.as_deref(), Some("secret"));
        assert_eq!(opts.transport, TransportKind::GrpcAsyncio);
        assert_eq!(opts.default_metadata, vec![("x-team".into(), "search".into())]);
        assert_eq!(opts.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_bad_yaml_is_configuration_error() {
        let err = ClientOptions::from_yaml_str("transport: carrier-pigeon").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let opts = ClientOptions {
            api_key: Some("super-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{:?}", opts);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(
            ClientOptions::new().timeout(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
    }
}
