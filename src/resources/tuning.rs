//! Tuned models (`tunedModels/*`) and their creation operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ListOptions, Page};
use crate::client::{Client, RequestOptions};
use crate::names;
use crate::operation::{Operation, TuningSnapshot};
use crate::transport::ApiCall;
use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TunedModelState {
    #[default]
    StateUnspecified,
    Creating,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Hyperparameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningExample {
    pub text_input: String,
    pub output: String,
}

impl TuningExample {
    pub fn new(text_input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            text_input: text_input.into(),
            output: output.into(),
        }
    }
}

impl<A: Into<String>, B: Into<String>> From<(A, B)> for TuningExample {
    fn from((input, output): (A, B)) -> Self {
        TuningExample::new(input, output)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TuningTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<TuningSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Hyperparameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TunedModel {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub state: TunedModelState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning_task: Option<TuningTask>,
}

/// Parameters of a tuning job.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTunedModel {
    source_model: String,
    training_data: Vec<TuningExample>,
    id: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    hyperparameters: Hyperparameters,
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("tuning"),
    )
}

impl CreateTunedModel {
    /// `source_model` is a base model (`models/...`) or another tuned model.
    pub fn new<I, E>(source_model: &str, training_data: I) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<TuningExample>,
    {
        let source_model = names::model_name(source_model)?;
        let training_data: Vec<TuningExample> =
            training_data.into_iter().map(Into::into).collect();
        if training_data.is_empty() {
            return Err(invalid("training_data", "training data must not be empty"));
        }
        Ok(Self {
            source_model,
            training_data,
            id: None,
            display_name: None,
            description: None,
            temperature: None,
            top_p: None,
            top_k: None,
            hyperparameters: Hyperparameters::default(),
        })
    }

    pub fn id(mut self, id: &str) -> Result<Self> {
        let slug = id.strip_prefix("tunedModels/").unwrap_or(id);
        names::validate_slug("tuned model", slug)?;
        self.id = Some(slug.to_string());
        Ok(self)
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = hyperparameters;
        self
    }

    fn to_call(&self) -> ApiCall {
        let mut body = Map::new();
        if self.source_model.starts_with("tunedModels/") {
            body.insert(
                "tunedModelSource".into(),
                json!({ "tunedModel": self.source_model }),
            );
        } else {
            body.insert("baseModel".into(), Value::String(self.source_model.clone()));
        }
        if let Some(name) = &self.display_name {
            body.insert("displayName".into(), json!(name));
        }
        if let Some(description) = &self.description {
            body.insert("description".into(), json!(description));
        }
        if let Some(t) = self.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = self.top_p {
            body.insert("topP".into(), json!(p));
        }
        if let Some(k) = self.top_k {
            body.insert("topK".into(), json!(k));
        }
        body.insert(
            "tuningTask".into(),
            json!({
                "hyperparameters": self.hyperparameters,
                "trainingData": { "examples": { "examples": self.training_data } },
            }),
        );
        ApiCall::post("tunedModels", Value::Object(body))
            .with_optional_query("tunedModelId", self.id.as_deref())
    }
}

impl Client {
    /// Start a tuning job. The returned operation resolves to the finished model.
    pub async fn create_tuned_model(
        &self,
        request: &CreateTunedModel,
    ) -> Result<Operation<TunedModel>> {
        let raw = self
            .transport()
            .unary(request.to_call(), &RequestOptions::default())
            .await?;
        let operation = Operation::from_value(self.clone(), raw)?;
        info!(
            operation = %operation.name(),
            examples = request.training_data.len(),
            "started tuning"
        );
        Ok(operation)
    }

    pub async fn get_tuned_model(&self, name: &str) -> Result<TunedModel> {
        self.fetch(ApiCall::get(names::tuned_model_name(name)?), "tuned model")
            .await
    }

    pub async fn list_tuned_models(&self, options: &ListOptions) -> Result<Page<TunedModel>> {
        self.fetch_page(ApiCall::get("tunedModels"), options, "tunedModels")
            .await
    }

    pub async fn update_tuned_model(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<TunedModel> {
        let name = names::tuned_model_name(name)?;
        let mut body = Map::new();
        let mut mask = Vec::new();
        if let Some(display) = display_name {
            body.insert("displayName".into(), json!(display));
            mask.push("displayName");
        }
        if let Some(description) = description {
            body.insert("description".into(), json!(description));
            mask.push("description");
        }
        if mask.is_empty() {
            return Err(invalid("<root>", "nothing to update"));
        }
        let call =
            ApiCall::patch(name, Value::Object(body)).with_query("updateMask", mask.join(","));
        self.fetch(call, "tuned model").await
    }

    pub async fn delete_tuned_model(&self, name: &str) -> Result<()> {
        let name = names::tuned_model_name(name)?;
        self.execute(ApiCall::delete(name.clone())).await?;
        info!(name = %name, "deleted tuned model");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_call_shape() {
        let call = CreateTunedModel::new("gemini-1.0-pro-001", vec![("1", "2"), ("2", "3")])
            .unwrap()
            .id("number-model")
            .unwrap()
            .hyperparameters(Hyperparameters {
                epoch_count: Some(5),
                ..Default::default()
            })
            .to_call();
        let body = call.body.as_ref().unwrap();
        assert_eq!(body["baseModel"], "models/gemini-1.0-pro-001");
        assert_eq!(body["tuningTask"]["hyperparameters"]["epochCount"], 5);
        assert_eq!(
            body["tuningTask"]["trainingData"]["examples"]["examples"][1]["textInput"],
            "2"
        );
        assert_eq!(call.query_value("tunedModelId"), Some("number-model"));
    }

    #[test]
    fn test_tuned_source_and_validation() {
        let call = CreateTunedModel::new("tunedModels/parent", vec![("a", "b")])
            .unwrap()
            .to_call();
        assert_eq!(
            call.body.as_ref().unwrap()["tunedModelSource"]["tunedModel"],
            "tunedModels/parent"
        );
        assert!(CreateTunedModel::new("models/x", Vec::<TuningExample>::new()).is_err());
        assert!(CreateTunedModel::new("models/x", vec![("a", "b")])
            .unwrap()
            .id("Bad_Id")
            .is_err());
    }
}
