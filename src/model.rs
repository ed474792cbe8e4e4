//! [`GenerativeModel`]: a model name bundled with request defaults, and the request builder
//! that merges those defaults with per-call overrides.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::chat::ChatSession;
use crate::client::{Client, RequestOptions};
use crate::coerce::{
    merge_generation, merge_safety, normalize_safety, to_content, to_contents,
    to_generation_config, to_tool_config, validate_generation_config, ContentInput,
    FunctionLibrary, GenerationConfigInput, SafetyInput, ToolConfigInput, ToolInput,
};
use crate::names;
use crate::resources::CachedContent;
use crate::response::{GenerationResponse, StreamingResponse};
use crate::transport::ApiCall;
use crate::types::{
    Content, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, SafetySetting, ToolConfig,
};
use crate::{Error, ErrorContext, Result};

/// Per-call overrides. Safety settings merge per category and generation config merges
/// field-wise over the model defaults; tools, tool config and system instruction replace
/// the model's when given.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub generation_config: Option<GenerationConfig>,
    pub safety_settings: Vec<SafetySetting>,
    pub tools: Option<FunctionLibrary>,
    pub tool_config: Option<ToolConfig>,
    pub system_instruction: Option<Content>,
    pub request_options: Option<RequestOptions>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation_config(mut self, config: impl Into<GenerationConfigInput>) -> Result<Self> {
        self.generation_config = Some(to_generation_config(config)?);
        Ok(self)
    }

    pub fn safety_settings(mut self, settings: impl Into<SafetyInput>) -> Result<Self> {
        self.safety_settings = normalize_safety(settings)?;
        Ok(self)
    }

    pub fn tools(mut self, tools: impl Into<ToolInput>) -> Result<Self> {
        self.tools = Some(FunctionLibrary::new(tools)?);
        Ok(self)
    }

    pub fn tool_config(mut self, config: impl Into<ToolConfigInput>) -> Result<Self> {
        self.tool_config = Some(to_tool_config(config)?);
        Ok(self)
    }

    pub fn system_instruction(mut self, instruction: impl Into<ContentInput>) -> Result<Self> {
        self.system_instruction = Some(to_content(instruction.into())?);
        Ok(self)
    }

    pub fn request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = Some(options);
        self
    }
}

/// A model name plus the defaults applied to every request made through it.
///
/// Immutable once built: the `with_*` methods consume the bundle and return a new one, so a
/// model shared through `Arc` by several chat sessions never changes underneath them.
#[derive(Debug, Clone)]
pub struct GenerativeModel {
    client: Client,
    model_name: String,
    safety_settings: Vec<SafetySetting>,
    generation_config: Option<GenerationConfig>,
    tools: Option<FunctionLibrary>,
    tool_config: Option<ToolConfig>,
    system_instruction: Option<Content>,
    cached_content: Option<String>,
    request_options: RequestOptions,
}

impl GenerativeModel {
    /// `model_name` may be a bare id (`"gemini-pro"`) or a full resource name.
    pub fn new(client: Client, model_name: &str) -> Result<Self> {
        Ok(Self {
            client,
            model_name: names::model_name(model_name)?,
            safety_settings: Vec::new(),
            generation_config: None,
            tools: None,
            tool_config: None,
            system_instruction: None,
            cached_content: None,
            request_options: RequestOptions::default(),
        })
    }

    /// A model that generates against previously cached context.
    pub fn from_cached_content(client: Client, cached: &CachedContent) -> Result<Self> {
        let mut model = Self::new(client, &cached.model)?;
        model.cached_content = Some(names::cached_content_name(&cached.name)?);
        Ok(model)
    }

    pub fn with_safety_settings(mut self, settings: impl Into<SafetyInput>) -> Result<Self> {
        self.safety_settings = normalize_safety(settings)?;
        Ok(self)
    }

    pub fn with_generation_config(
        mut self,
        config: impl Into<GenerationConfigInput>,
    ) -> Result<Self> {
        self.generation_config = Some(to_generation_config(config)?);
        Ok(self)
    }

    pub fn with_tools(mut self, tools: impl Into<ToolInput>) -> Result<Self> {
        let library = FunctionLibrary::new(tools)?;
        self.tools = (!library.is_empty()).then_some(library);
        Ok(self)
    }

    pub fn with_tool_config(mut self, config: impl Into<ToolConfigInput>) -> Result<Self> {
        self.tool_config = Some(to_tool_config(config)?);
        Ok(self)
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<ContentInput>) -> Result<Self> {
        self.system_instruction = Some(to_content(instruction.into())?);
        Ok(self)
    }

    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Full resource name, e.g. `models/gemini-pro`.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn safety_settings(&self) -> &[SafetySetting] {
        &self.safety_settings
    }

    pub fn generation_config(&self) -> Option<&GenerationConfig> {
        self.generation_config.as_ref()
    }

    pub fn tools(&self) -> Option<&FunctionLibrary> {
        self.tools.as_ref()
    }

    pub fn tool_config(&self) -> Option<&ToolConfig> {
        self.tool_config.as_ref()
    }

    pub fn system_instruction(&self) -> Option<&Content> {
        self.system_instruction.as_ref()
    }

    pub fn cached_content(&self) -> Option<&str> {
        self.cached_content.as_deref()
    }

    /// Merge model defaults with `call` and validate the result. No request is sent.
    pub fn build_request(
        &self,
        contents: impl Into<ContentInput>,
        call: &CallOptions,
    ) -> Result<GenerateContentRequest> {
        let contents = to_contents(contents.into())?;
        if contents.is_empty() {
            return Err(Error::invalid_input_with_context(
                "contents must not be empty",
                ErrorContext::new()
                    .with_field_path("contents")
                    .with_source("request_builder"),
            ));
        }
        if let Some(i) = contents.iter().position(|c| c.parts.is_empty()) {
            return Err(Error::invalid_input_with_context(
                "every content needs at least one part",
                ErrorContext::new()
                    .with_field_path(format!("contents[{}].parts", i))
                    .with_source("request_builder"),
            ));
        }

        let generation_config = merge_generation(
            self.generation_config.as_ref(),
            call.generation_config.as_ref(),
        );
        if let Some(config) = &generation_config {
            validate_generation_config(config)?;
        }

        let tools = call
            .tools
            .as_ref()
            .or(self.tools.as_ref())
            .map(FunctionLibrary::to_proto)
            .unwrap_or_default();

        let request = GenerateContentRequest {
            model: self.model_name.clone(),
            contents,
            tools,
            tool_config: call.tool_config.clone().or_else(|| self.tool_config.clone()),
            generation_config,
            safety_settings: merge_safety(&self.safety_settings, &call.safety_settings),
            system_instruction: call
                .system_instruction
                .clone()
                .or_else(|| self.system_instruction.clone()),
            cached_content: self.cached_content.clone(),
        };
        debug!(
            model = %self.model_name,
            contents = request.contents.len(),
            tools = request.tools.len(),
            safety_settings = request.safety_settings.len(),
            "built generate content request"
        );
        Ok(request)
    }

    fn request_options_for(&self, call: &CallOptions) -> RequestOptions {
        call.request_options
            .clone()
            .unwrap_or_else(|| self.request_options.clone())
    }

    fn method_path(&self, method: &str) -> String {
        format!("{}:{}", self.model_name, method)
    }

    /// Unary generation with the model defaults.
    pub async fn generate_content(
        &self,
        contents: impl Into<ContentInput>,
    ) -> Result<GenerationResponse> {
        self.generate_content_with(contents, &CallOptions::default())
            .await
    }

    pub async fn generate_content_with(
        &self,
        contents: impl Into<ContentInput>,
        call: &CallOptions,
    ) -> Result<GenerationResponse> {
        let request = self.build_request(contents, call)?;
        let body = serde_json::to_value(&request)?;
        let raw = self
            .client
            .transport()
            .unary(
                ApiCall::post(self.method_path("generateContent"), body),
                &self.request_options_for(call),
            )
            .await?;
        let response = decode_response(raw)?;
        let expected = request
            .generation_config
            .as_ref()
            .and_then(|c| c.candidate_count)
            .unwrap_or(1);
        check_candidates(&response, expected)?;
        Ok(GenerationResponse::from_raw(response))
    }

    /// Server-streaming generation with the model defaults.
    pub async fn generate_content_stream(
        &self,
        contents: impl Into<ContentInput>,
    ) -> Result<StreamingResponse> {
        self.generate_content_stream_with(contents, &CallOptions::default())
            .await
    }

    pub async fn generate_content_stream_with(
        &self,
        contents: impl Into<ContentInput>,
        call: &CallOptions,
    ) -> Result<StreamingResponse> {
        let request = self.build_request(contents, call)?;
        let body = serde_json::to_value(&request)?;
        let upstream = self
            .client
            .transport()
            .stream(
                ApiCall::post(self.method_path("streamGenerateContent"), body),
                &self.request_options_for(call),
            )
            .await?;
        Ok(StreamingResponse::from_stream(upstream).await)
    }

    /// Token count of the request that `contents` would produce.
    pub async fn count_tokens(&self, contents: impl Into<ContentInput>) -> Result<CountTokensResponse> {
        let request = self.build_request(contents, &CallOptions::default())?;
        let body = json!({ "generateContentRequest": serde_json::to_value(&request)? });
        let raw = self
            .client
            .transport()
            .unary(
                ApiCall::post(self.method_path("countTokens"), body),
                &self.request_options,
            )
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Start a chat on this model. Multi-candidate configs are rejected: a chat turn needs
    /// exactly one model reply.
    pub fn start_chat(self: &Arc<Self>, history: Vec<Content>) -> Result<ChatSession> {
        if let Some(n) = self
            .generation_config
            .as_ref()
            .and_then(|c| c.candidate_count)
            .filter(|&n| n > 1)
        {
            return Err(Error::invalid_input_with_context(
                format!("chat sessions need candidate_count = 1, got {}", n),
                ErrorContext::new()
                    .with_field_path("generation_config.candidate_count")
                    .with_source("chat_session"),
            ));
        }
        ChatSession::new(Arc::clone(self), history)
    }
}

fn decode_response(raw: Value) -> Result<GenerateContentResponse> {
    serde_json::from_value(raw)
        .map_err(|e| Error::protocol(format!("response is not a GenerateContentResponse: {}", e)))
}

/// A unary reply holds at most `expected` candidates, each with a distinct index below it.
fn check_candidates(response: &GenerateContentResponse, expected: u32) -> Result<()> {
    let candidates = &response.candidates;
    if candidates.len() > expected as usize {
        return Err(Error::protocol(format!(
            "asked for {} candidate(s), the response has {}",
            expected,
            candidates.len()
        )));
    }
    let mut seen = std::collections::HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        let index = candidate.index();
        if index >= expected || !seen.insert(index) {
            return Err(Error::protocol(format!(
                "candidate index {} is duplicated or outside [0, {})",
                index, expected
            )));
        }
    }
    Ok(())
}

impl Client {
    /// A model bundle on this client.
    pub fn generative_model(&self, model_name: &str) -> Result<GenerativeModel> {
        GenerativeModel::new(self.clone(), model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::CallableFunctionDeclaration;
    use crate::transport::{FileUpload, Transport};
    use crate::types::{FunctionDeclaration, HarmBlockThreshold, HarmCategory, Part, Role};
    use crate::BoxStream;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn unary(&self, _: ApiCall, _: &RequestOptions) -> Result<Value> {
            Err(Error::protocol("unexpected request"))
        }
        async fn stream(&self, _: ApiCall, _: &RequestOptions) -> Result<BoxStream<'static, Value>> {
            Err(Error::protocol("unexpected request"))
        }
        async fn upload(&self, _: FileUpload, _: &RequestOptions) -> Result<Value> {
            Err(Error::protocol("unexpected request"))
        }
    }

    fn model() -> GenerativeModel {
        Client::with_transport(Arc::new(Unreachable))
            .generative_model("gemini-pro")
            .unwrap()
    }

    #[test]
    fn test_bare_model_name_is_prefixed() {
        assert_eq!(model().model_name(), "models/gemini-pro");
    }

    #[test]
    fn test_text_becomes_user_content() {
        let request = model().build_request("Hello", &CallOptions::new()).unwrap();
        assert_eq!(request.contents, vec![Content::user("Hello")]);
        assert_eq!(request.model, "models/gemini-pro");
        assert!(request.generation_config.is_none());
    }

    #[test]
    fn test_empty_contents_rejected() {
        let empty: Vec<Content> = Vec::new();
        assert!(matches!(
            model().build_request(empty, &CallOptions::new()),
            Err(Error::InvalidInput { .. })
        ));
        let no_parts = vec![Content::new(Role::User, Vec::new())];
        let err = model().build_request(no_parts, &CallOptions::new()).unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("contents[0].parts")
        );
    }

    #[test]
    fn test_call_overrides_merge_over_defaults() {
        let m = model()
            .with_safety_settings(vec![("harassment", "low"), ("hate", "high")])
            .unwrap()
            .with_generation_config(GenerationConfig::new().temperature(0.1).max_output_tokens(32))
            .unwrap();
        let call = CallOptions::new()
            .safety_settings(vec![("harassment", "none")])
            .unwrap()
            .generation_config(GenerationConfig::new().temperature(0.9))
            .unwrap();
        let request = m.build_request("hi", &call).unwrap();

        let harassment = request
            .safety_settings
            .iter()
            .find(|s| s.category == HarmCategory::Harassment)
            .unwrap();
        assert_eq!(harassment.threshold, HarmBlockThreshold::BlockNone);
        assert_eq!(request.safety_settings.len(), 2);
        let config = request.generation_config.unwrap();
        assert_eq!(config.temperature, Some(0.9));
        assert_eq!(config.max_output_tokens, Some(32));

        // Model defaults are untouched.
        assert_eq!(m.generation_config().unwrap().temperature, Some(0.1));
    }

    #[test]
    fn test_call_tools_replace_model_tools() {
        let m = model()
            .with_tools(FunctionDeclaration::new("model_fn", "from the model"))
            .unwrap();
        let call = CallOptions::new()
            .tools(FunctionDeclaration::new("call_fn", "from the call"))
            .unwrap();
        let request = m.build_request("hi", &call).unwrap();
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].function_declarations[0].name, "call_fn");

        let request = m.build_request("hi", &CallOptions::new()).unwrap();
        assert_eq!(request.tools[0].function_declarations[0].name, "model_fn");
    }

    #[test]
    fn test_callable_tools_are_declared() {
        let datetime =
            CallableFunctionDeclaration::no_args("datetime", "current time", || Ok("now")).unwrap();
        let m = model().with_tools(datetime).unwrap();
        let request = m
            .build_request(vec![Part::text("what time is it?")], &CallOptions::new())
            .unwrap();
        assert_eq!(request.tools[0].function_declarations[0].name, "datetime");
        assert!(m.tools().unwrap().callable("datetime").is_some());
    }

    #[test]
    fn test_multi_candidate_chat_rejected() {
        let m = Arc::new(
            model()
                .with_generation_config(GenerationConfig::new().candidate_count(2))
                .unwrap(),
        );
        assert!(matches!(
            m.start_chat(Vec::new()),
            Err(Error::InvalidInput { .. })
        ));
    }
}
