//! Text embeddings: `embedContent` and batched `batchEmbedContents`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::client::Client;
use crate::coerce::{to_content, ContentInput};
use crate::names;
use crate::transport::ApiCall;
use crate::types::Content;
use crate::{Error, ErrorContext, Result};

/// Inputs per `batchEmbedContents` request.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    TaskTypeUnspecified,
    RetrievalQuery,
    RetrievalDocument,
    SemanticSimilarity,
    Classification,
    Clustering,
    QuestionAnswering,
    FactVerification,
}

impl TaskType {
    /// Accepts wire names and short forms: `retrieval_document`, `document`, `query`, ...
    pub fn parse(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        let key = key.strip_prefix("task_type_").unwrap_or(&key);
        Ok(match key {
            "unspecified" => TaskType::TaskTypeUnspecified,
            "retrieval_query" | "query" => TaskType::RetrievalQuery,
            "retrieval_document" | "document" => TaskType::RetrievalDocument,
            "semantic_similarity" | "similarity" => TaskType::SemanticSimilarity,
            "classification" => TaskType::Classification,
            "clustering" => TaskType::Clustering,
            "question_answering" => TaskType::QuestionAnswering,
            "fact_verification" => TaskType::FactVerification,
            _ => {
                return Err(invalid(
                    "task_type",
                    format!("unknown embedding task type `{}`", s),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedOptions {
    pub task_type: Option<TaskType>,
    /// Only valid with [`TaskType::RetrievalDocument`].
    pub title: Option<String>,
    pub output_dimensionality: Option<u32>,
}

impl EmbedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn output_dimensionality(mut self, n: u32) -> Self {
        self.output_dimensionality = Some(n);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.is_some() && self.task_type != Some(TaskType::RetrievalDocument) {
            return Err(invalid(
                "title",
                "a title is only allowed with the RETRIEVAL_DOCUMENT task type",
            ));
        }
        if self.output_dimensionality == Some(0) {
            return Err(invalid(
                "output_dimensionality",
                "output_dimensionality must be positive",
            ));
        }
        Ok(())
    }

    fn request(&self, model: &str, content: &Content) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), Value::String(model.to_string()));
        body.insert("content".into(), json!(content));
        if let Some(task_type) = self.task_type {
            body.insert("taskType".into(), json!(task_type));
        }
        if let Some(title) = &self.title {
            body.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(n) = self.output_dimensionality {
            body.insert("outputDimensionality".into(), json!(n));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContentEmbedding {
    #[serde(default)]
    pub values: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: ContentEmbedding,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("embeddings"),
    )
}

impl Client {
    pub async fn embed_content(
        &self,
        model: &str,
        content: impl Into<ContentInput>,
        options: &EmbedOptions,
    ) -> Result<ContentEmbedding> {
        options.validate()?;
        let model = names::model_name(model)?;
        let content = to_content(content.into())?;
        let body = options.request(&model, &content);
        let response: EmbedResponse = self
            .fetch(ApiCall::post(format!("{}:embedContent", model), body), "embedding")
            .await?;
        Ok(response.embedding)
    }

    /// Embed many inputs, [`EMBEDDING_BATCH_SIZE`] per request, in order.
    ///
    /// Batches run sequentially. The first failing batch fails the whole call and no
    /// partial output is returned.
    pub async fn batch_embed_contents<I, C>(
        &self,
        model: &str,
        contents: I,
        options: &EmbedOptions,
    ) -> Result<Vec<ContentEmbedding>>
    where
        I: IntoIterator<Item = C>,
        C: Into<ContentInput>,
    {
        options.validate()?;
        let model = names::model_name(model)?;
        let contents = contents
            .into_iter()
            .map(|c| to_content(c.into()))
            .collect::<Result<Vec<_>>>()?;
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(contents.len());
        for (batch_idx, batch) in contents.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
            let requests: Vec<Value> = batch
                .iter()
                .map(|content| options.request(&model, content))
                .collect();
            let response: BatchEmbedResponse = self
                .fetch(
                    ApiCall::post(
                        format!("{}:batchEmbedContents", model),
                        json!({ "requests": requests }),
                    ),
                    "batch embedding",
                )
                .await?;
            if response.embeddings.len() != batch.len() {
                return Err(Error::protocol(format!(
                    "batch {} returned {} embeddings for {} inputs",
                    batch_idx,
                    response.embeddings.len(),
                    batch.len()
                )));
            }
            debug!(batch = batch_idx, size = batch.len(), "embedded batch");
            all.extend(response.embeddings);
        }
        Ok(all)
    }
}
