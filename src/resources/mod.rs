//! Resource clients: files, cached contents, semantic retrieval, permissions, models,
//! tuned models and embeddings.
//!
//! Every operation is a method on [`Client`]. Resource names are validated locally (see
//! [`crate::names`]) before any request is issued.
//!
//! | Module | Resources |
//! |--------|-----------|
//! | [`files`] | `files/*` uploads and metadata |
//! | [`caching`] | `cachedContents/*` |
//! | [`retrieval`] | `corpora/*`, documents, chunks, queries |
//! | [`permissions`] | `*/permissions/*` on corpora and tuned models |
//! | [`models`] | `models/*` |
//! | [`tuning`] | `tunedModels/*` and their creation operations |
//! | [`embeddings`] | `embedContent` / `batchEmbedContents` |

pub mod caching;
pub mod embeddings;
pub mod files;
pub mod models;
pub mod permissions;
pub mod retrieval;
pub mod tuning;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::{Client, RequestOptions};
use crate::transport::ApiCall;
use crate::{Error, Result};

pub use caching::{CachedContent, CachedContentUpdate, CreateCachedContent, TtlInput};
pub use embeddings::{ContentEmbedding, EmbedOptions, TaskType, EMBEDDING_BATCH_SIZE};
pub use files::{File, FileState, UploadFileOptions, VideoMetadata};
pub use models::Model;
pub use permissions::{GranteeType, Permission, PermissionRole};
pub use retrieval::{
    BatchChunksInput, Chunk, ChunkData, ChunkState, Condition, Corpus, CustomMetadata, Document,
    MetadataFilter, QueryOptions, RelevantChunk, MAX_BATCH_CHUNKS, MAX_RESULTS_COUNT,
};
pub use tuning::{CreateTunedModel, Hyperparameters, TunedModel, TunedModelState, TuningExample};

/// One page of a list call.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}

/// Paging parameters shared by the list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, n: u32) -> Self {
        self.page_size = Some(n);
        self
    }

    pub fn page_token(mut self, token: impl Into<String>) -> Self {
        self.page_token = Some(token.into());
        self
    }

    pub(crate) fn apply(&self, call: ApiCall) -> ApiCall {
        call.with_optional_query("pageSize", self.page_size)
            .with_optional_query("pageToken", self.page_token.as_deref())
    }
}

fn decode<T: DeserializeOwned>(raw: Value, what: &str) -> Result<T> {
    serde_json::from_value(raw).map_err(|e| Error::protocol(format!("malformed {}: {}", what, e)))
}

fn decode_page<T: DeserializeOwned>(mut raw: Value, field: &str) -> Result<Page<T>> {
    let items = match raw.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => Vec::new(),
        Some(list) => decode(list, field)?,
    };
    let next_page_token = raw
        .get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    Ok(Page {
        items,
        next_page_token,
    })
}

impl Client {
    pub(crate) async fn fetch<T: DeserializeOwned>(&self, call: ApiCall, what: &str) -> Result<T> {
        let raw = self
            .transport()
            .unary(call, &RequestOptions::default())
            .await?;
        decode(raw, what)
    }

    pub(crate) async fn fetch_page<T: DeserializeOwned>(
        &self,
        call: ApiCall,
        options: &ListOptions,
        field: &str,
    ) -> Result<Page<T>> {
        let raw = self
            .transport()
            .unary(options.apply(call), &RequestOptions::default())
            .await?;
        decode_page(raw, field)
    }

    pub(crate) async fn execute(&self, call: ApiCall) -> Result<()> {
        self.transport()
            .unary(call, &RequestOptions::default())
            .await?;
        Ok(())
    }
}
