//! Semantic retrieval: `corpora/*`, their documents and chunks, and relevance queries.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{ListOptions, Page};
use crate::client::Client;
use crate::names::{self, child_name};
use crate::transport::ApiCall;
use crate::{Error, ErrorContext, Result};

/// Upper bound of `results_count` on a query.
pub const MAX_RESULTS_COUNT: u32 = 100;
/// Upper bound of chunks in one batch request.
pub const MAX_BATCH_CHUNKS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Corpus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StringList {
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetadataValue {
    StringValue(String),
    StringListValue(StringList),
    NumericValue(f64),
}

/// A user-defined key/value attached to a document or chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetadata {
    pub key: String,
    #[serde(flatten)]
    pub value: MetadataValue,
}

impl CustomMetadata {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: MetadataValue::StringValue(value.into()),
        }
    }

    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value: MetadataValue::NumericValue(value),
        }
    }

    pub fn string_list<I, S>(key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            value: MetadataValue::StringListValue(StringList {
                values: values.into_iter().map(Into::into).collect(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_metadata: Vec<CustomMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkData {
    #[serde(default)]
    pub string_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkState {
    #[default]
    StateUnspecified,
    StatePendingProcessing,
    StateActive,
    StateFailed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub data: ChunkData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_metadata: Vec<CustomMetadata>,
    #[serde(default, skip_serializing)]
    pub state: ChunkState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Chunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            data: ChunkData {
                string_value: text.into(),
            },
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<CustomMetadata>) -> Self {
        self.custom_metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
    Includes,
    Excludes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub operation: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_value: Option<f64>,
}

impl Condition {
    pub fn string(operation: Operator, value: impl Into<String>) -> Self {
        Self {
            operation,
            string_value: Some(value.into()),
            numeric_value: None,
        }
    }

    pub fn numeric(operation: Operator, value: f64) -> Self {
        Self {
            operation,
            string_value: None,
            numeric_value: Some(value),
        }
    }
}

/// Conditions on one metadata key; conditions are ORed, filters are ANDed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub key: String,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOptions {
    pub results_count: Option<u32>,
    pub metadata_filters: Vec<MetadataFilter>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results_count(mut self, n: u32) -> Self {
        self.results_count = Some(n);
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.metadata_filters.push(filter);
        self
    }

    fn to_body(&self, query: &str) -> Result<Value> {
        if query.trim().is_empty() {
            return Err(invalid("query", "query text must not be empty"));
        }
        let mut body = Map::new();
        body.insert("query".into(), Value::String(query.to_string()));
        if let Some(n) = self.results_count {
            if n == 0 || n > MAX_RESULTS_COUNT {
                return Err(invalid(
                    "results_count",
                    format!("results_count must be within 1..={}, got {}", MAX_RESULTS_COUNT, n),
                ));
            }
            body.insert("resultsCount".into(), json!(n));
        }
        if !self.metadata_filters.is_empty() {
            body.insert("metadataFilters".into(), json!(self.metadata_filters));
        }
        Ok(Value::Object(body))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantChunk {
    #[serde(default)]
    pub chunk_relevance_score: f32,
    pub chunk: Chunk,
}

/// Chunks to create in one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchChunksInput {
    /// Chunk id to text.
    Map(BTreeMap<String, String>),
    /// `(id, text, metadata)`; a missing id lets the server pick one.
    Tuples(Vec<(Option<String>, String, Vec<CustomMetadata>)>),
    /// Fully formed chunks.
    Requests(Vec<Chunk>),
}

impl From<BTreeMap<String, String>> for BatchChunksInput {
    fn from(m: BTreeMap<String, String>) -> Self {
        BatchChunksInput::Map(m)
    }
}

impl From<HashMap<String, String>> for BatchChunksInput {
    fn from(m: HashMap<String, String>) -> Self {
        BatchChunksInput::Map(m.into_iter().collect())
    }
}

impl From<Vec<(&str, &str)>> for BatchChunksInput {
    fn from(v: Vec<(&str, &str)>) -> Self {
        BatchChunksInput::Tuples(
            v.into_iter()
                .map(|(id, text)| (Some(id.to_string()), text.to_string(), Vec::new()))
                .collect(),
        )
    }
}

impl From<Vec<(Option<String>, String, Vec<CustomMetadata>)>> for BatchChunksInput {
    fn from(v: Vec<(Option<String>, String, Vec<CustomMetadata>)>) -> Self {
        BatchChunksInput::Tuples(v)
    }
}

impl From<Vec<Chunk>> for BatchChunksInput {
    fn from(v: Vec<Chunk>) -> Self {
        BatchChunksInput::Requests(v)
    }
}

impl From<Vec<&str>> for BatchChunksInput {
    fn from(v: Vec<&str>) -> Self {
        BatchChunksInput::Requests(v.into_iter().map(Chunk::new).collect())
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("retrieval"),
    )
}

fn check_batch_len(n: usize) -> Result<()> {
    if n == 0 {
        return Err(invalid("requests", "a batch needs at least one chunk"));
    }
    if n > MAX_BATCH_CHUNKS {
        return Err(invalid(
            "requests",
            format!("at most {} chunks per batch, got {}", MAX_BATCH_CHUNKS, n),
        ));
    }
    Ok(())
}

/// Canonical chunks with validated full names.
fn batch_chunks(document: &str, input: BatchChunksInput) -> Result<Vec<Chunk>> {
    let chunks: Vec<Chunk> = match input {
        BatchChunksInput::Map(map) => map
            .into_iter()
            .map(|(id, text)| Chunk::new(text).with_name(id))
            .collect(),
        BatchChunksInput::Tuples(tuples) => tuples
            .into_iter()
            .map(|(id, text, metadata)| {
                Chunk::new(text)
                    .with_name(id.unwrap_or_default())
                    .with_metadata(metadata)
            })
            .collect(),
        BatchChunksInput::Requests(chunks) => chunks,
    };
    check_batch_len(chunks.len())?;
    chunks
        .into_iter()
        .map(|mut chunk| {
            let id = (!chunk.name.is_empty()).then_some(chunk.name.as_str());
            chunk.name = child_name(document, "chunks", "chunk", id)?.unwrap_or_default();
            Ok(chunk)
        })
        .collect()
}

fn delete_call(name: String, force: bool) -> ApiCall {
    let call = ApiCall::delete(name);
    if force {
        call.with_query("force", true)
    } else {
        call
    }
}

fn named_body(name: Option<String>, display_name: Option<&str>) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(name) = name {
        body.insert("name".into(), Value::String(name));
    }
    if let Some(display) = display_name {
        body.insert("displayName".into(), Value::String(display.to_string()));
    }
    body
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    relevant_chunks: Vec<RelevantChunk>,
}

#[derive(Deserialize)]
struct ChunkList {
    #[serde(default)]
    chunks: Vec<Chunk>,
}

impl Client {
    // Corpora

    pub async fn create_corpus(
        &self,
        name: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<Corpus> {
        let name = name.map(names::corpus_name).transpose()?;
        let body = named_body(name, display_name);
        let corpus: Corpus = self
            .fetch(ApiCall::post("corpora", Value::Object(body)), "corpus")
            .await?;
        info!(name = %corpus.name, "created corpus");
        Ok(corpus)
    }

    pub async fn get_corpus(&self, name: &str) -> Result<Corpus> {
        self.fetch(ApiCall::get(names::corpus_name(name)?), "corpus")
            .await
    }

    pub async fn list_corpora(&self, options: &ListOptions) -> Result<Page<Corpus>> {
        self.fetch_page(ApiCall::get("corpora"), options, "corpora")
            .await
    }

    pub async fn update_corpus(&self, name: &str, display_name: &str) -> Result<Corpus> {
        let name = names::corpus_name(name)?;
        let call = ApiCall::patch(name, json!({ "displayName": display_name }))
            .with_query("updateMask", "displayName");
        self.fetch(call, "corpus").await
    }

    /// `force` also deletes the corpus's documents and chunks.
    pub async fn delete_corpus(&self, name: &str, force: bool) -> Result<()> {
        let name = names::corpus_name(name)?;
        self.execute(delete_call(name.clone(), force)).await?;
        info!(name = %name, force, "deleted corpus");
        Ok(())
    }

    pub async fn query_corpus(
        &self,
        name: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RelevantChunk>> {
        let name = names::corpus_name(name)?;
        let body = options.to_body(query)?;
        let response: QueryResponse = self
            .fetch(ApiCall::post(format!("{}:query", name), body), "query response")
            .await?;
        debug!(corpus = %name, results = response.relevant_chunks.len(), "queried corpus");
        Ok(response.relevant_chunks)
    }

    // Documents

    pub async fn create_document(
        &self,
        corpus: &str,
        id: Option<&str>,
        display_name: Option<&str>,
        custom_metadata: Vec<CustomMetadata>,
    ) -> Result<Document> {
        let corpus = names::corpus_name(corpus)?;
        let name = child_name(&corpus, "documents", "document", id)?;
        let mut body = named_body(name, display_name);
        if !custom_metadata.is_empty() {
            body.insert("customMetadata".into(), json!(custom_metadata));
        }
        let document: Document = self
            .fetch(
                ApiCall::post(format!("{}/documents", corpus), Value::Object(body)),
                "document",
            )
            .await?;
        info!(name = %document.name, "created document");
        Ok(document)
    }

    pub async fn get_document(&self, name: &str) -> Result<Document> {
        self.fetch(ApiCall::get(names::document_name(name)?), "document")
            .await
    }

    pub async fn list_documents(
        &self,
        corpus: &str,
        options: &ListOptions,
    ) -> Result<Page<Document>> {
        let corpus = names::corpus_name(corpus)?;
        self.fetch_page(ApiCall::get(format!("{}/documents", corpus)), options, "documents")
            .await
    }

    pub async fn update_document(
        &self,
        name: &str,
        display_name: Option<&str>,
        custom_metadata: Option<Vec<CustomMetadata>>,
    ) -> Result<Document> {
        let name = names::document_name(name)?;
        let mut body = Map::new();
        let mut mask = Vec::new();
        if let Some(display) = display_name {
            body.insert("displayName".into(), Value::String(display.to_string()));
            mask.push("displayName");
        }
        if let Some(metadata) = custom_metadata {
            body.insert("customMetadata".into(), json!(metadata));
            mask.push("customMetadata");
        }
        if mask.is_empty() {
            return Err(invalid("<root>", "nothing to update"));
        }
        let call = ApiCall::patch(name, Value::Object(body)).with_query("updateMask", mask.join(","));
        self.fetch(call, "document").await
    }

    /// `force` also deletes the document's chunks.
    pub async fn delete_document(&self, name: &str, force: bool) -> Result<()> {
        let name = names::document_name(name)?;
        self.execute(delete_call(name.clone(), force)).await?;
        info!(name = %name, force, "deleted document");
        Ok(())
    }

    pub async fn query_document(
        &self,
        name: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Vec<RelevantChunk>> {
        let name = names::document_name(name)?;
        let body = options.to_body(query)?;
        let response: QueryResponse = self
            .fetch(ApiCall::post(format!("{}:query", name), body), "query response")
            .await?;
        Ok(response.relevant_chunks)
    }

    // Chunks

    pub async fn create_chunk(&self, document: &str, chunk: Chunk) -> Result<Chunk> {
        let document = names::document_name(document)?;
        let mut chunks = batch_chunks(&document, BatchChunksInput::Requests(vec![chunk]))?;
        let chunk = chunks.remove(0);
        self.fetch(
            ApiCall::post(format!("{}/chunks", document), json!(chunk)),
            "chunk",
        )
        .await
    }

    pub async fn get_chunk(&self, name: &str) -> Result<Chunk> {
        self.fetch(ApiCall::get(names::chunk_name(name)?), "chunk")
            .await
    }

    pub async fn list_chunks(&self, document: &str, options: &ListOptions) -> Result<Page<Chunk>> {
        let document = names::document_name(document)?;
        self.fetch_page(ApiCall::get(format!("{}/chunks", document)), options, "chunks")
            .await
    }

    pub async fn update_chunk(
        &self,
        name: &str,
        data: Option<&str>,
        custom_metadata: Option<Vec<CustomMetadata>>,
    ) -> Result<Chunk> {
        let name = names::chunk_name(name)?;
        let mut body = Map::new();
        let mut mask = Vec::new();
        if let Some(text) = data {
            body.insert("data".into(), json!({ "stringValue": text }));
            mask.push("data");
        }
        if let Some(metadata) = custom_metadata {
            body.insert("customMetadata".into(), json!(metadata));
            mask.push("customMetadata");
        }
        if mask.is_empty() {
            return Err(invalid("<root>", "nothing to update"));
        }
        let call = ApiCall::patch(name, Value::Object(body)).with_query("updateMask", mask.join(","));
        self.fetch(call, "chunk").await
    }

    pub async fn delete_chunk(&self, name: &str) -> Result<()> {
        let name = names::chunk_name(name)?;
        self.execute(ApiCall::delete(name)).await
    }

    /// Create up to [`MAX_BATCH_CHUNKS`] chunks in a single request.
    pub async fn batch_create_chunks(
        &self,
        document: &str,
        chunks: impl Into<BatchChunksInput>,
    ) -> Result<Vec<Chunk>> {
        let document = names::document_name(document)?;
        let chunks = batch_chunks(&document, chunks.into())?;
        let requests: Vec<Value> = chunks
            .iter()
            .map(|chunk| json!({ "parent": document, "chunk": chunk }))
            .collect();
        let count = requests.len();
        let response: ChunkList = self
            .fetch(
                ApiCall::post(
                    format!("{}/chunks:batchCreate", document),
                    json!({ "requests": requests }),
                ),
                "batch create response",
            )
            .await?;
        info!(document = %document, count, "created chunks");
        Ok(response.chunks)
    }

    /// Replace the text of up to [`MAX_BATCH_CHUNKS`] chunks, given as `(name, text)` pairs.
    pub async fn batch_update_chunks(
        &self,
        document: &str,
        updates: Vec<(String, String)>,
    ) -> Result<Vec<Chunk>> {
        let document = names::document_name(document)?;
        check_batch_len(updates.len())?;
        let requests = updates
            .into_iter()
            .map(|(name, text)| {
                let id = Some(name.as_str());
                let name = child_name(&document, "chunks", "chunk", id)?.unwrap_or_default();
                Ok(json!({
                    "chunk": { "name": name, "data": { "stringValue": text } },
                    "updateMask": "data",
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        let response: ChunkList = self
            .fetch(
                ApiCall::post(
                    format!("{}/chunks:batchUpdate", document),
                    json!({ "requests": requests }),
                ),
                "batch update response",
            )
            .await?;
        Ok(response.chunks)
    }

    /// Delete up to [`MAX_BATCH_CHUNKS`] chunks by id or full name.
    pub async fn batch_delete_chunks(&self, document: &str, chunks: &[&str]) -> Result<()> {
        let document = names::document_name(document)?;
        check_batch_len(chunks.len())?;
        let requests = chunks
            .iter()
            .map(|id| {
                let name = child_name(&document, "chunks", "chunk", Some(*id))?.unwrap_or_default();
                Ok(json!({ "name": name }))
            })
            .collect::<Result<Vec<_>>>()?;
        self.execute(ApiCall::post(
            format!("{}/chunks:batchDelete", document),
            json!({ "requests": requests }),
        ))
        .await?;
        info!(document = %document, count = chunks.len(), "deleted chunks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "corpora/my-corpus/documents/my-doc";

    #[test]
    fn test_results_count_boundary() {
        assert!(QueryOptions::new().results_count(100).to_body("q").is_ok());
        let err = QueryOptions::new().results_count(101).to_body("q").unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(QueryOptions::new().to_body("  ").is_err());
    }

    #[test]
    fn test_query_body_shape() {
        let body = QueryOptions::new()
            .results_count(5)
            .filter(MetadataFilter {
                key: "genre".into(),
                conditions: vec![Condition::string(Operator::Equal, "drama")],
            })
            .to_body("what happens next?")
            .unwrap();
        assert_eq!(body["resultsCount"], 5);
        assert_eq!(body["metadataFilters"][0]["conditions"][0]["operation"], "EQUAL");
        assert_eq!(body["metadataFilters"][0]["conditions"][0]["stringValue"], "drama");
    }

    #[test]
    fn test_custom_metadata_wire_shape() {
        let v = serde_json::to_value(CustomMetadata::string_list("tags", ["a", "b"])).unwrap();
        assert_eq!(v, json!({"key": "tags", "stringListValue": {"values": ["a", "b"]}}));
        let back: CustomMetadata =
            serde_json::from_value(json!({"key": "year", "numericValue": 1999.0})).unwrap();
        assert_eq!(back, CustomMetadata::numeric("year", 1999.0));
    }

    #[test]
    fn test_heterogeneous_batch_inputs() {
        let mut map = BTreeMap::new();
        map.insert("c-1".to_string(), "one".to_string());
        let from_map = batch_chunks(DOC, map.into()).unwrap();
        assert_eq!(from_map[0].name, format!("{}/chunks/c-1", DOC));

        let from_tuples = batch_chunks(DOC, vec![("c-2", "two")].into()).unwrap();
        assert_eq!(from_tuples[0].data.string_value, "two");

        let from_requests = batch_chunks(DOC, vec!["unnamed"].into()).unwrap();
        assert!(from_requests[0].name.is_empty());

        let qualified = Chunk::new("x").with_name(format!("{}/chunks/c-3", DOC));
        let kept = batch_chunks(DOC, vec![qualified].into()).unwrap();
        assert_eq!(kept[0].name, format!("{}/chunks/c-3", DOC));
    }

    #[test]
    fn test_batch_limits_and_slugs() {
        let too_many: Vec<Chunk> = (0..101).map(|i| Chunk::new(i.to_string())).collect();
        assert!(batch_chunks(DOC, too_many.into()).is_err());
        assert!(batch_chunks(DOC, BatchChunksInput::Requests(Vec::new())).is_err());
        assert!(batch_chunks(DOC, vec![("Not_A_Slug", "x")].into()).is_err());
    }

    #[test]
    fn test_chunk_state_not_serialized() {
        let v = serde_json::to_value(Chunk::new("hello")).unwrap();
        assert_eq!(v, json!({"data": {"stringValue": "hello"}}));
    }
}
