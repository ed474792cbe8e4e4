//! Generation-config coercion, validation and merging.

use serde_json::Value;

use super::schema::{normalize_json_schema, schema_for};
use crate::types::GenerationConfig;
use crate::{Error, ErrorContext, Result};

pub const MAX_STOP_SEQUENCES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationConfigInput {
    Config(GenerationConfig),
    /// Snake- or camel-case fields; `response_schema` may be plain JSON Schema.
    Json(Value),
}

impl From<GenerationConfig> for GenerationConfigInput {
    fn from(c: GenerationConfig) -> Self {
        GenerationConfigInput::Config(c)
    }
}

impl From<Value> for GenerationConfigInput {
    fn from(v: Value) -> Self {
        GenerationConfigInput::Json(v)
    }
}

impl GenerationConfig {
    /// Constrain output to JSON matching `T`'s schema.
    pub fn response_schema_for<T: schemars::JsonSchema>(self) -> Result<Self> {
        let schema = schema_for::<T>()?;
        Ok(self
            .response_mime_type("application/json")
            .response_schema(schema))
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(format!("generation_config.{}", field))
            .with_source("generation_config"),
    )
}

pub fn validate_generation_config(config: &GenerationConfig) -> Result<()> {
    if config.candidate_count == Some(0) {
        return Err(invalid("candidate_count", "candidate_count must be at least 1"));
    }
    if let Some(stops) = &config.stop_sequences {
        if stops.len() > MAX_STOP_SEQUENCES {
            return Err(invalid(
                "stop_sequences",
                format!(
                    "at most {} stop sequences are allowed, got {}",
                    MAX_STOP_SEQUENCES,
                    stops.len()
                ),
            ));
        }
    }
    if let Some(t) = config.temperature {
        if !t.is_finite() || t < 0.0 {
            return Err(invalid("temperature", "temperature must be a non-negative number"));
        }
    }
    if let Some(p) = config.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(invalid("top_p", "top_p must be within [0, 1]"));
        }
    }
    Ok(())
}

/// Coerce and validate a generation config.
pub fn to_generation_config(input: impl Into<GenerationConfigInput>) -> Result<GenerationConfig> {
    let config = match input.into() {
        GenerationConfigInput::Config(c) => c,
        GenerationConfigInput::Json(Value::Object(mut map)) => {
            let raw_schema = map
                .remove("response_schema")
                .or_else(|| map.remove("responseSchema"));
            let mut config: GenerationConfig = serde_json::from_value(Value::Object(map))
                .map_err(|e| invalid("<root>", format!("malformed generation config: {}", e)))?;
            if let Some(raw) = raw_schema.filter(|v| !v.is_null()) {
                config.response_schema = Some(normalize_json_schema(&raw)?);
            }
            config
        }
        GenerationConfigInput::Json(Value::Null) => GenerationConfig::default(),
        GenerationConfigInput::Json(other) => {
            return Err(invalid(
                "<root>",
                format!("generation config must be an object, got {}", other),
            ))
        }
    };
    validate_generation_config(&config)?;
    Ok(config)
}

/// Field-wise merge; fields set in `overrides` win.
pub fn merge_generation(
    base: Option<&GenerationConfig>,
    overrides: Option<&GenerationConfig>,
) -> Option<GenerationConfig> {
    match (base, overrides) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(b), Some(o)) => Some(GenerationConfig {
            candidate_count: o.candidate_count.or(b.candidate_count),
            stop_sequences: o.stop_sequences.clone().or_else(|| b.stop_sequences.clone()),
            max_output_tokens: o.max_output_tokens.or(b.max_output_tokens),
            temperature: o.temperature.or(b.temperature),
            top_p: o.top_p.or(b.top_p),
            top_k: o.top_k.or(b.top_k),
            response_mime_type: o
                .response_mime_type
                .clone()
                .or_else(|| b.response_mime_type.clone()),
            response_schema: o
                .response_schema
                .clone()
                .or_else(|| b.response_schema.clone()),
        }),
    }
}
