//! Base model metadata (`models/*`).

use serde::{Deserialize, Serialize};

use super::{ListOptions, Page};
use crate::client::Client;
use crate::names;
use crate::transport::ApiCall;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub base_model_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_token_limit: u32,
    #[serde(default)]
    pub output_token_limit: u32,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl Model {
    pub fn supports(&self, method: &str) -> bool {
        self.supported_generation_methods.iter().any(|m| m == method)
    }
}

impl Client {
    /// Fetch a base model; bare ids gain the `models/` prefix.
    pub async fn get_model(&self, name: &str) -> Result<Model> {
        self.fetch(ApiCall::get(names::model_name(name)?), "model")
            .await
    }

    pub async fn list_models(&self, options: &ListOptions) -> Result<Page<Model>> {
        self.fetch_page(ApiCall::get("models"), options, "models")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_decodes_with_missing_fields() {
        let model: Model = serde_json::from_value(serde_json::json!({
            "name": "models/gemini-1.5-flash",
            "inputTokenLimit": 1048576,
            "supportedGenerationMethods": ["generateContent", "countTokens"]
        }))
        .unwrap();
        assert!(model.supports("countTokens"));
        assert!(!model.supports("embedContent"));
        assert_eq!(model.top_k, None);
    }
}
