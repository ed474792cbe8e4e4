use std::sync::Arc;

use super::options::{ClientOptions, TransportKind};
use super::Client;
use crate::transport::{HttpTransport, Transport};
use crate::{Error, ErrorContext, Result};

/// Builder for [`Client`].
///
/// Precedence for every setting: explicit builder call > [`ClientOptions`] > environment.
#[derive(Default)]
pub struct ClientBuilder {
    options: ClientOptions,
    api_key: Option<String>,
    endpoint: Option<String>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a full set of options (e.g. loaded with [`ClientOptions::from_yaml_file`]).
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the service endpoint (primarily for testing with mock servers).
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Use a custom transport instead of the REST one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Client> {
        let mut options = self.options;
        if let Some(key) = self.api_key {
            options.api_key = Some(key);
        }
        if let Some(endpoint) = self.endpoint {
            options.endpoint_override = Some(endpoint);
        }
        let options = options.with_env_fallback();

        let transport = match self.transport {
            Some(t) => t,
            None => match options.transport {
                TransportKind::Rest => Arc::new(HttpTransport::new(&options)?) as Arc<dyn Transport>,
                kind @ (TransportKind::Grpc | TransportKind::GrpcAsyncio) => {
                    return Err(Error::configuration_with_context(
                        format!("transport {:?} is not available in this client", kind),
                        ErrorContext::new()
                            .with_field_path("transport")
                            .with_details("use `rest` or supply a custom Transport")
                            .with_source("client_builder"),
                    ))
                }
            },
        };
        tracing::debug!(?options, "built client");
        Ok(Client::from_parts(transport, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grpc_is_rejected() {
        let err = ClientBuilder::new()
            .options(ClientOptions {
                transport: TransportKind::Grpc,
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_explicit_key_beats_options() {
        let client = ClientBuilder::new()
            .options(ClientOptions {
                api_key: Some("from-options".into()),
                ..Default::default()
            })
            .api_key("explicit")
            .build()
            .unwrap();
        assert_eq!(client.options().api_key.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_bad_endpoint_is_configuration_error() {
        let err = ClientBuilder::new()
            .api_key("k")
            .endpoint("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
