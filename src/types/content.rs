//! Content and part types of the generative language wire schema.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::serde_helpers::base64_bytes;

/// Author of a [`Content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    /// Function results; the service names this role `function`.
    #[serde(rename = "function", alias = "tool")]
    Tool,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
            Role::Tool => "function",
            Role::System => "system",
        }
    }

    /// Case-insensitive parse, accepting `tool` and `function` for [`Role::Tool`].
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "model" => Some(Role::Model),
            "tool" | "function" => Some(Role::Tool),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Inline binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Reference to a file previously uploaded to the file service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, alias = "mime_type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(alias = "file_uri")]
    pub file_uri: String,
}

/// A function invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// The result of a function invocation, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Map<String, Value>,
}

/// Code generated by the model for the code-execution tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableCode {
    #[serde(default)]
    pub language: String,
    pub code: String,
}

/// Outcome of running [`ExecutableCode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Atomic piece of model input or output.
///
/// Serialized as a single-key object (`{"text": ...}`, `{"inlineData": {...}}`, ...).
/// Deserialization tolerates snake_case keys and ignores unknown sibling keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
    FileData(FileData),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    ExecutableCode(ExecutableCode),
    CodeExecutionResult(CodeExecutionResult),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartRepr {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inline_data")]
    inline_data: Option<Blob>,
    #[serde(default, alias = "file_data")]
    file_data: Option<FileData>,
    #[serde(default, alias = "function_call")]
    function_call: Option<FunctionCall>,
    #[serde(default, alias = "function_response")]
    function_response: Option<FunctionResponse>,
    #[serde(default, alias = "executable_code")]
    executable_code: Option<ExecutableCode>,
    #[serde(default, alias = "code_execution_result")]
    code_execution_result: Option<CodeExecutionResult>,
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let repr = PartRepr::deserialize(d)?;
        let mut found: Vec<Part> = Vec::with_capacity(1);
        if let Some(t) = repr.text {
            found.push(Part::Text(t));
        }
        if let Some(b) = repr.inline_data {
            found.push(Part::InlineData(b));
        }
        if let Some(f) = repr.file_data {
            found.push(Part::FileData(f));
        }
        if let Some(c) = repr.function_call {
            found.push(Part::FunctionCall(c));
        }
        if let Some(r) = repr.function_response {
            found.push(Part::FunctionResponse(r));
        }
        if let Some(c) = repr.executable_code {
            found.push(Part::ExecutableCode(c));
        }
        if let Some(r) = repr.code_execution_result {
            found.push(Part::CodeExecutionResult(r));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(serde::de::Error::custom(
                "part must carry one of: text, inline_data, file_data, function_call, \
                 function_response, executable_code, code_execution_result",
            )),
            n => Err(serde::de::Error::custom(format!(
                "part must carry exactly one payload, found {}",
                n
            ))),
        }
    }
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn inline_data(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Part::InlineData(Blob {
            mime_type: mime_type.into(),
            data,
        })
    }

    pub fn file_data(file_uri: impl Into<String>, mime_type: Option<String>) -> Self {
        Part::FileData(FileData {
            mime_type,
            file_uri: file_uri.into(),
        })
    }

    pub fn function_response(name: impl Into<String>, response: Map<String, Value>) -> Self {
        Part::FunctionResponse(FunctionResponse {
            name: name.into(),
            response,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(c) => Some(c),
            _ => None,
        }
    }

    /// Short name of the payload kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Text(_) => "text",
            Part::InlineData(_) => "inline_data",
            Part::FileData(_) => "file_data",
            Part::FunctionCall(_) => "function_call",
            Part::FunctionResponse(_) => "function_response",
            Part::ExecutableCode(_) => "executable_code",
            Part::CodeExecutionResult(_) => "code_execution_result",
        }
    }
}

/// Ordered parts with an optional author role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            role: Some(role),
            parts,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(Part::as_function_call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_wire_shape() {
        let part = Part::inline_data("image/png", vec![1, 2, 3]);
        let v = serde_json::to_value(&part).unwrap();
        assert_eq!(v, json!({"inlineData": {"mimeType": "image/png", "data": "AQID"}}));

        let text = serde_json::to_value(Part::text("hi")).unwrap();
        assert_eq!(text, json!({"text": "hi"}));
    }

    #[test]
    fn test_part_accepts_snake_case_and_extra_keys() {
        let p: Part = serde_json::from_value(json!({
            "function_call": {"name": "f", "args": {"x": 1}},
        }))
        .unwrap();
        assert_eq!(p.as_function_call().unwrap().name, "f");

        let p: Part = serde_json::from_value(json!({"text": "t", "thought": false})).unwrap();
        assert_eq!(p.as_text(), Some("t"));
    }

    #[test]
    fn test_part_rejects_empty_and_ambiguous() {
        assert!(serde_json::from_value::<Part>(json!({})).is_err());
        assert!(serde_json::from_value::<Part>(json!({"text": "a", "fileData": {"fileUri": "u"}}))
            .is_err());
    }

    #[test]
    fn test_content_round_trip() {
        let wire = json!({
            "role": "model",
            "parts": [
                {"text": "hello"},
                {"functionCall": {"name": "lookup", "args": {"q": "rust"}}},
                {"fileData": {"mimeType": "video/mp4", "fileUri": "https://x/files/abc"}},
                {"executableCode": {"language": "PYTHON", "code": "print(1)"}},
                {"codeExecutionResult": {"outcome": "OUTCOME_OK", "output": "1"}}
            ]
        });
        let content: Content = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(serde_json::to_value(&content).unwrap(), wire);
    }

    #[test]
    fn test_role_function_alias() {
        let c: Content = serde_json::from_value(json!({"role": "tool", "parts": []})).unwrap();
        assert_eq!(c.role, Some(Role::Tool));
        assert_eq!(serde_json::to_value(c.role).unwrap(), json!("function"));
        assert_eq!(Role::parse("MODEL"), Some(Role::Model));
        assert_eq!(Role::parse("assistant"), None);
    }
}
