//! Tool, function declaration and schema types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Data type of a [`Schema`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[serde(alias = "string")]
    String,
    #[serde(alias = "number")]
    Number,
    #[serde(alias = "integer")]
    Integer,
    #[serde(alias = "boolean")]
    Boolean,
    #[serde(alias = "array")]
    Array,
    #[serde(alias = "object")]
    Object,
}

impl SchemaType {
    /// Lowercase JSON-Schema name.
    pub fn json_name(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "string" => Some(SchemaType::String),
            "number" => Some(SchemaType::Number),
            "integer" => Some(SchemaType::Integer),
            "boolean" => Some(SchemaType::Boolean),
            "array" => Some(SchemaType::Array),
            "object" => Some(SchemaType::Object),
            _ => None,
        }
    }
}

/// JSON-Schema-like description of a value, in the service's restricted dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl Schema {
    pub fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            format: None,
            description: None,
            nullable: None,
            enum_values: Vec::new(),
            items: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(SchemaType::String)
    }

    pub fn integer() -> Self {
        Self::new(SchemaType::Integer)
    }

    pub fn number() -> Self {
        Self::new(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaType::Boolean)
    }

    pub fn array(items: Schema) -> Self {
        let mut s = Self::new(SchemaType::Array);
        s.items = Some(Box::new(items));
        s
    }

    pub fn object() -> Self {
        Self::new(SchemaType::Object)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: Schema, required: bool) -> Self {
        let name = name.into();
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Standard (lowercase) JSON Schema rendition, suitable for validators.
    pub fn to_json_schema(&self) -> Value {
        let mut map = Map::new();
        let ty = self.schema_type.json_name();
        if self.nullable == Some(true) {
            map.insert("type".into(), json!([ty, "null"]));
        } else {
            map.insert("type".into(), json!(ty));
        }
        if let Some(ref d) = self.description {
            map.insert("description".into(), json!(d));
        }
        if let Some(ref f) = self.format {
            map.insert("format".into(), json!(f));
        }
        if !self.enum_values.is_empty() {
            map.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(ref items) = self.items {
            map.insert("items".into(), items.to_json_schema());
        }
        if !self.properties.is_empty() {
            let props: Map<String, Value> = self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json_schema()))
                .collect();
            map.insert("properties".into(), Value::Object(props));
        }
        if !self.required.is_empty() {
            map.insert("required".into(), json!(self.required));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Schema>,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Schema) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Marker enabling the server-side code execution tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CodeExecution {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default, alias = "function_declarations", skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[serde(default, alias = "code_execution", skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<CodeExecution>,
}

/// How the model may use the declared functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionCallingMode {
    #[serde(rename = "MODE_UNSPECIFIED")]
    Unspecified,
    /// The model decides whether to call a function.
    #[default]
    Auto,
    /// The model must call one of the (allowed) functions.
    Any,
    /// The model must not call functions.
    None,
}

impl FunctionCallingMode {
    /// Case-insensitive parse; accepts `"any"`, `"ANY"` and `"function_calling_mode_any"` forms.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let bare = lowered
            .strip_prefix("function_calling_mode_")
            .or_else(|| lowered.strip_prefix("mode_"))
            .unwrap_or(&lowered);
        match bare {
            "auto" => Some(Self::Auto),
            "any" => Some(Self::Any),
            "none" => Some(Self::None),
            "unspecified" => Some(Self::Unspecified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    #[serde(default)]
    pub mode: FunctionCallingMode,
    #[serde(default, alias = "allowed_function_names", skip_serializing_if = "Vec::is_empty")]
    pub allowed_function_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(alias = "function_calling_config")]
    pub function_calling_config: FunctionCallingConfig,
}

impl ToolConfig {
    pub fn new(mode: FunctionCallingMode) -> Self {
        Self {
            function_calling_config: FunctionCallingConfig {
                mode,
                allowed_function_names: Vec::new(),
            },
        }
    }

    pub fn with_allowed_function_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.function_calling_config.allowed_function_names =
            names.into_iter().map(Into::into).collect();
        self
    }

    pub fn mode(&self) -> FunctionCallingMode {
        self.function_calling_config.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_wire_shape() {
        let schema = Schema::object()
            .with_property("city", Schema::string(), true)
            .with_property("days", Schema::array(Schema::integer()), false);
        let v = serde_json::to_value(&schema).unwrap();
        assert_eq!(v["type"], "OBJECT");
        assert_eq!(v["properties"]["days"]["items"]["type"], "INTEGER");
        assert_eq!(v["required"], json!(["city"]));

        let back: Schema = serde_json::from_value(v).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_schema_accepts_lowercase_types() {
        let s: Schema = serde_json::from_value(json!({"type": "string"})).unwrap();
        assert_eq!(s.schema_type, SchemaType::String);
    }

    #[test]
    fn test_json_schema_rendition() {
        let mut s = Schema::string();
        s.nullable = Some(true);
        assert_eq!(s.to_json_schema(), json!({"type": ["string", "null"]}));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(FunctionCallingMode::parse("ANY"), Some(FunctionCallingMode::Any));
        assert_eq!(
            FunctionCallingMode::parse("function_calling_mode_none"),
            Some(FunctionCallingMode::None)
        );
        assert_eq!(FunctionCallingMode::parse("sometimes"), None);
    }

    #[test]
    fn test_tool_config_wire_shape() {
        let cfg = ToolConfig::new(FunctionCallingMode::Any).with_allowed_function_names(["a"]);
        assert_eq!(
            serde_json::to_value(&cfg).unwrap(),
            json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["a"]}})
        );
    }
}
