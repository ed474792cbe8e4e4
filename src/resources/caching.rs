//! `cachedContents/*`: context cached server-side and referenced by later requests.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ListOptions, Page};
use crate::client::Client;
use crate::coerce::{
    to_content, to_contents, to_tool_config, ContentInput, FunctionLibrary, ToolConfigInput,
    ToolInput,
};
use crate::names;
use crate::transport::ApiCall;
use crate::types::serde_helpers::{duration_to_wire, opt_duration};
use crate::types::{Content, Tool, ToolConfig};
use crate::{Error, ErrorContext, Result};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CachedContentUsage {
    #[serde(default)]
    pub total_token_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CachedContent {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<CachedContentUsage>,
}

/// A TTL as integer seconds, a duration, or a `{"seconds": n}` record.
#[derive(Debug, Clone, PartialEq)]
pub enum TtlInput {
    Seconds(i64),
    Duration(Duration),
    Json(Value),
}

impl From<i64> for TtlInput {
    fn from(s: i64) -> Self {
        TtlInput::Seconds(s)
    }
}

impl From<Duration> for TtlInput {
    fn from(d: Duration) -> Self {
        TtlInput::Duration(d)
    }
}

impl From<Value> for TtlInput {
    fn from(v: Value) -> Self {
        TtlInput::Json(v)
    }
}

fn invalid(field: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("cached_content"),
    )
}

pub fn to_ttl(input: impl Into<TtlInput>) -> Result<Duration> {
    let seconds = match input.into() {
        TtlInput::Duration(d) => return Ok(d),
        TtlInput::Seconds(s) => s,
        TtlInput::Json(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| invalid("ttl", format!("ttl must be whole seconds, got {}", n)))?,
        TtlInput::Json(Value::Object(map)) => map
            .get("seconds")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid("ttl", "ttl record needs an integer `seconds` field"))?,
        TtlInput::Json(Value::String(s)) => {
            return crate::types::serde_helpers::duration_from_wire(&s)
                .ok_or_else(|| invalid("ttl", format!("invalid ttl `{}`", s)))
        }
        TtlInput::Json(other) => {
            return Err(invalid("ttl", format!("unsupported ttl value {}", other)))
        }
    };
    u64::try_from(seconds)
        .map(Duration::from_secs)
        .map_err(|_| invalid("ttl", format!("ttl must not be negative, got {}", seconds)))
}

#[derive(Debug, Clone, PartialEq)]
enum Expiry {
    Ttl(Duration),
    At(DateTime<Utc>),
}

/// Parameters of a new cached content.
#[derive(Debug, Clone)]
pub struct CreateCachedContent {
    model: String,
    name: Option<String>,
    display_name: Option<String>,
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    tools: Vec<Tool>,
    tool_config: Option<ToolConfig>,
    expiry: Expiry,
}

impl CreateCachedContent {
    pub fn new(model: &str) -> Result<Self> {
        Ok(Self {
            model: names::model_name(model)?,
            name: None,
            display_name: None,
            system_instruction: None,
            contents: Vec::new(),
            tools: Vec::new(),
            tool_config: None,
            expiry: Expiry::Ttl(DEFAULT_TTL),
        })
    }

    pub fn name(mut self, name: &str) -> Result<Self> {
        self.name = Some(names::cached_content_name(name)?);
        Ok(self)
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn system_instruction(mut self, instruction: impl Into<ContentInput>) -> Result<Self> {
        self.system_instruction = Some(to_content(instruction.into())?);
        Ok(self)
    }

    pub fn contents(mut self, contents: impl Into<ContentInput>) -> Result<Self> {
        self.contents = to_contents(contents.into())?;
        Ok(self)
    }

    pub fn tools(mut self, tools: impl Into<ToolInput>) -> Result<Self> {
        self.tools = FunctionLibrary::new(tools)?.to_proto();
        Ok(self)
    }

    pub fn tool_config(mut self, config: impl Into<ToolConfigInput>) -> Result<Self> {
        self.tool_config = Some(to_tool_config(config)?);
        Ok(self)
    }

    pub fn ttl(mut self, ttl: impl Into<TtlInput>) -> Result<Self> {
        self.expiry = Expiry::Ttl(to_ttl(ttl)?);
        Ok(self)
    }

    pub fn expire_time(mut self, at: DateTime<Utc>) -> Self {
        self.expiry = Expiry::At(at);
        self
    }

    pub(crate) fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), Value::String(self.model.clone()));
        if let Some(name) = &self.name {
            body.insert("name".into(), Value::String(name.clone()));
        }
        if let Some(display) = &self.display_name {
            body.insert("displayName".into(), Value::String(display.clone()));
        }
        if let Some(instruction) = &self.system_instruction {
            body.insert("systemInstruction".into(), json!(instruction));
        }
        if !self.contents.is_empty() {
            body.insert("contents".into(), json!(self.contents));
        }
        if !self.tools.is_empty() {
            body.insert("tools".into(), json!(self.tools));
        }
        if let Some(config) = &self.tool_config {
            body.insert("toolConfig".into(), json!(config));
        }
        match &self.expiry {
            Expiry::Ttl(d) => body.insert("ttl".into(), Value::String(duration_to_wire(*d))),
            Expiry::At(at) => body.insert("expireTime".into(), Value::String(at.to_rfc3339())),
        };
        Value::Object(body)
    }
}

/// The only mutable fields of a cached content: its expiry.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedContentUpdate {
    Ttl(Duration),
    ExpireTime(DateTime<Utc>),
}

impl CachedContentUpdate {
    pub fn ttl(ttl: impl Into<TtlInput>) -> Result<Self> {
        Ok(CachedContentUpdate::Ttl(to_ttl(ttl)?))
    }

    /// Parse `{"ttl": ...}` or `{"expire_time": "<rfc3339>"}`. Any other key is rejected.
    pub fn from_json(update: &Value) -> Result<Self> {
        let map = update
            .as_object()
            .ok_or_else(|| invalid("<root>", "update must be an object"))?;
        if let Some(key) = map
            .keys()
            .find(|k| !matches!(k.as_str(), "ttl" | "expire_time" | "expireTime"))
        {
            return Err(invalid(
                key,
                format!("only `ttl` or `expire_time` can be updated, got `{}`", key),
            ));
        }
        let expire = map.get("expire_time").or_else(|| map.get("expireTime"));
        match (map.get("ttl"), expire) {
            (Some(ttl), None) => Self::ttl(ttl.clone()),
            (None, Some(Value::String(at))) => DateTime::parse_from_rfc3339(at)
                .map(|t| CachedContentUpdate::ExpireTime(t.with_timezone(&Utc)))
                .map_err(|e| invalid("expire_time", format!("invalid timestamp: {}", e))),
            (None, Some(other)) => Err(invalid(
                "expire_time",
                format!("expire_time must be an RFC 3339 string, got {}", other),
            )),
            (Some(_), Some(_)) => Err(invalid("<root>", "set either `ttl` or `expire_time`, not both")),
            (None, None) => Err(invalid("<root>", "update needs `ttl` or `expire_time`")),
        }
    }

    fn to_call(&self, name: String) -> ApiCall {
        match self {
            CachedContentUpdate::Ttl(d) => {
                ApiCall::patch(name, json!({ "ttl": duration_to_wire(*d) }))
                    .with_query("updateMask", "ttl")
            }
            CachedContentUpdate::ExpireTime(at) => {
                ApiCall::patch(name, json!({ "expireTime": at.to_rfc3339() }))
                    .with_query("updateMask", "expireTime")
            }
        }
    }
}

impl Client {
    pub async fn create_cached_content(&self, request: &CreateCachedContent) -> Result<CachedContent> {
        let cached: CachedContent = self
            .fetch(ApiCall::post("cachedContents", request.to_body()), "cached content")
            .await?;
        info!(name = %cached.name, model = %cached.model, "created cached content");
        Ok(cached)
    }

    pub async fn get_cached_content(&self, name: &str) -> Result<CachedContent> {
        self.fetch(ApiCall::get(names::cached_content_name(name)?), "cached content")
            .await
    }

    pub async fn list_cached_contents(&self, options: &ListOptions) -> Result<Page<CachedContent>> {
        self.fetch_page(ApiCall::get("cachedContents"), options, "cachedContents")
            .await
    }

    pub async fn update_cached_content(
        &self,
        name: &str,
        update: &CachedContentUpdate,
    ) -> Result<CachedContent> {
        let name = names::cached_content_name(name)?;
        self.fetch(update.to_call(name), "cached content").await
    }

    /// Like [`update_cached_content`](Self::update_cached_content), from a loose JSON object.
    pub async fn update_cached_content_from_json(
        &self,
        name: &str,
        update: &Value,
    ) -> Result<CachedContent> {
        let update = CachedContentUpdate::from_json(update)?;
        self.update_cached_content(name, &update).await
    }

    pub async fn delete_cached_content(&self, name: &str) -> Result<()> {
        let name = names::cached_content_name(name)?;
        self.execute(ApiCall::delete(name.clone())).await?;
        info!(name = %name, "deleted cached content");
        Ok(())
    }
}
