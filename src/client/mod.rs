//! Client configuration, the process-wide default client, and per-call options.

mod builder;
pub(crate) mod error_classification;
pub mod options;
mod policy;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;

use crate::transport::Transport;
use crate::{Error, Result};

pub use builder::ClientBuilder;
pub use options::{ClientOptions, RequestOptions, TransportKind};
pub use policy::RetryPolicy;

/// Handle to the service. Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    options: Arc<ClientOptions>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client from `GOOGLE_API_KEY` and the other environment defaults.
    pub fn from_env() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// Wrap an existing transport (tests, custom backends).
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::from_parts(transport, ClientOptions::default())
    }

    pub(crate) fn from_parts(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self {
            transport,
            options: Arc::new(options),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}

static DEFAULT_CLIENT: Lazy<ArcSwapOption<Client>> = Lazy::new(ArcSwapOption::empty);

/// Replace the process-wide default client.
pub fn configure(options: ClientOptions) -> Result<()> {
    let client = ClientBuilder::new().options(options).build()?;
    DEFAULT_CLIENT.store(Some(Arc::new(client)));
    Ok(())
}

/// Install an already-built client as the default.
pub fn set_default_client(client: Client) {
    DEFAULT_CLIENT.store(Some(Arc::new(client)));
}

/// The process-wide default client, built from the environment on first use.
pub fn default_client() -> Result<Arc<Client>> {
    if let Some(client) = DEFAULT_CLIENT.load_full() {
        return Ok(client);
    }
    let fresh = Arc::new(Client::from_env()?);
    // A concurrent `configure` wins over the lazily built client.
    DEFAULT_CLIENT.rcu(|current| match current {
        Some(existing) => Some(Arc::clone(existing)),
        None => Some(Arc::clone(&fresh)),
    });
    DEFAULT_CLIENT
        .load_full()
        .ok_or_else(|| Error::configuration("default client was reset during initialisation"))
}
