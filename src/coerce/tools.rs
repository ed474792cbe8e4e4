//! Tool coercion, callable function declarations and the [`FunctionLibrary`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::schema::{normalize_json_schema, schema_for};
use crate::types::{
    CodeExecution, FunctionCall, FunctionCallingMode, FunctionDeclaration, Part, Schema, Tool,
    ToolConfig,
};
use crate::{Error, ErrorContext, Result};

type Handler = Arc<dyn Fn(Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// A function declaration that also owns a local handler.
#[derive(Clone)]
pub struct CallableFunctionDeclaration {
    declaration: FunctionDeclaration,
    handler: Handler,
    validator: Option<Arc<JSONSchema>>,
}

impl fmt::Debug for CallableFunctionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableFunctionDeclaration")
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

fn compile_validator(name: &str, schema: &Schema) -> Result<Arc<JSONSchema>> {
    let doc = schema.to_json_schema();
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&doc)
        .map_err(|e| {
            Error::invalid_input_with_context(
                format!("parameters schema of `{}` does not compile: {}", name, e),
                ErrorContext::new()
                    .with_field_path(format!("{}.parameters", name))
                    .with_source("function_library"),
            )
        })?;
    Ok(Arc::new(compiled))
}

impl CallableFunctionDeclaration {
    /// Declare a function whose arguments deserialize into `A`; the parameter schema is
    /// derived from `A`'s `JsonSchema` impl.
    pub fn new<A, R, F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Result<Self>
    where
        A: DeserializeOwned + schemars::JsonSchema + 'static,
        R: Serialize + 'static,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut parameters = schema_for::<A>()?;
        parameters.description = None;
        let handler: Handler = Arc::new(move |args: Map<String, Value>| {
            let typed: A = serde_json::from_value(Value::Object(args))?;
            let out = f(typed)?;
            Ok(serde_json::to_value(out)?)
        });
        Self::from_parts(
            FunctionDeclaration::new(name, description).with_parameters(parameters),
            handler,
        )
    }

    /// Declare a function with an explicit schema and an untyped handler.
    pub fn raw<F>(declaration: FunctionDeclaration, f: F) -> Result<Self>
    where
        F: Fn(Map<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_parts(declaration, Arc::new(f))
    }

    /// Declare a function that takes no arguments.
    pub fn no_args<R, F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Result<Self>
    where
        R: Serialize + 'static,
        F: Fn() -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |_args| Ok(serde_json::to_value(f()?)?));
        Self::from_parts(FunctionDeclaration::new(name, description), handler)
    }

    fn from_parts(declaration: FunctionDeclaration, handler: Handler) -> Result<Self> {
        if declaration.name.trim().is_empty() {
            return Err(Error::invalid_input("function declaration requires a name"));
        }
        let validator = match &declaration.parameters {
            Some(schema) => Some(compile_validator(&declaration.name, schema)?),
            None => None,
        };
        Ok(Self {
            declaration,
            handler,
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn declaration(&self) -> &FunctionDeclaration {
        &self.declaration
    }

    /// Validate `args` against the parameter schema and run the handler. Non-object results
    /// are wrapped as `{"result": value}`.
    pub fn call(&self, args: &Map<String, Value>) -> Result<Part> {
        let name = self.declaration.name.clone();
        if let Some(validator) = &self.validator {
            let instance = Value::Object(args.clone());
            let problems: Vec<String> = match validator.validate(&instance) {
                Ok(()) => Vec::new(),
                Err(errors) => errors.map(|e| e.to_string()).collect(),
            };
            if !problems.is_empty() {
                return Err(Error::invalid_input_with_context(
                    format!("arguments for `{}` do not match its schema", name),
                    ErrorContext::new()
                        .with_field_path(format!("{}.args", name))
                        .with_details(problems.join("; "))
                        .with_source("function_library"),
                ));
            }
        }
        let value = (self.handler)(args.clone()).map_err(|e| Error::FunctionExecution {
            name: name.clone(),
            message: format!("{:#}", e),
        })?;
        let response = match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        Ok(Part::function_response(name, response))
    }
}

/// Anything that can become one or more [`Tool`]s.
#[derive(Debug, Clone)]
pub enum ToolInput {
    Tool(Tool),
    Declaration(FunctionDeclaration),
    Callable(CallableFunctionDeclaration),
    /// `{"function_declarations": [...]}`, `{"code_execution": {}}` or a bare declaration.
    Json(Value),
    /// The string `"code_execution"`.
    CodeExecution,
    Many(Vec<ToolInput>),
}

impl From<Tool> for ToolInput {
    fn from(t: Tool) -> Self {
        ToolInput::Tool(t)
    }
}

impl From<FunctionDeclaration> for ToolInput {
    fn from(d: FunctionDeclaration) -> Self {
        ToolInput::Declaration(d)
    }
}

impl From<CallableFunctionDeclaration> for ToolInput {
    fn from(c: CallableFunctionDeclaration) -> Self {
        ToolInput::Callable(c)
    }
}

impl From<Value> for ToolInput {
    fn from(v: Value) -> Self {
        ToolInput::Json(v)
    }
}

impl<T: Into<ToolInput>> From<Vec<T>> for ToolInput {
    fn from(v: Vec<T>) -> Self {
        ToolInput::Many(v.into_iter().map(Into::into).collect())
    }
}

/// A declaration slot inside a library tool.
#[derive(Debug, Clone)]
enum Declared {
    Plain(FunctionDeclaration),
    Callable(CallableFunctionDeclaration),
}

impl Declared {
    fn declaration(&self) -> &FunctionDeclaration {
        match self {
            Declared::Plain(d) => d,
            Declared::Callable(c) => c.declaration(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LibraryTool {
    declarations: Vec<Declared>,
    code_execution: bool,
}

fn declaration_from_json(value: Value) -> Result<FunctionDeclaration> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(Error::invalid_input(format!(
                "function declaration must be an object, got {}",
                other
            )))
        }
    };
    let parameters = match obj.remove("parameters") {
        None | Some(Value::Null) => None,
        Some(p) => Some(normalize_json_schema(&p)?),
    };
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_input("function declaration requires a name"))?
        .to_string();
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(FunctionDeclaration {
        name,
        description,
        parameters,
    })
}

fn tool_from_json(value: Value) -> Result<LibraryTool> {
    let obj = match &value {
        Value::Object(obj) => obj,
        Value::String(s) if s == "code_execution" => {
            return Ok(LibraryTool {
                declarations: Vec::new(),
                code_execution: true,
            })
        }
        other => {
            return Err(Error::invalid_input(format!(
                "cannot build a tool from JSON {}",
                other
            )))
        }
    };
    let decls = obj
        .get("function_declarations")
        .or_else(|| obj.get("functionDeclarations"));
    let code_execution = obj.contains_key("code_execution") || obj.contains_key("codeExecution");
    match decls {
        Some(Value::Array(items)) => Ok(LibraryTool {
            declarations: items
                .iter()
                .cloned()
                .map(|d| declaration_from_json(d).map(Declared::Plain))
                .collect::<Result<Vec<_>>>()?,
            code_execution,
        }),
        Some(_) => Err(Error::invalid_input("function_declarations must be a list")),
        None if code_execution => Ok(LibraryTool {
            declarations: Vec::new(),
            code_execution,
        }),
        None => Ok(LibraryTool {
            declarations: vec![Declared::Plain(declaration_from_json(value)?)],
            code_execution: false,
        }),
    }
}

fn flatten(input: ToolInput, out: &mut Vec<LibraryTool>) -> Result<()> {
    match input {
        ToolInput::Tool(t) => out.push(LibraryTool {
            declarations: t
                .function_declarations
                .into_iter()
                .map(Declared::Plain)
                .collect(),
            code_execution: t.code_execution.is_some(),
        }),
        ToolInput::Declaration(d) => out.push(LibraryTool {
            declarations: vec![Declared::Plain(d)],
            code_execution: false,
        }),
        ToolInput::Callable(c) => out.push(LibraryTool {
            declarations: vec![Declared::Callable(c)],
            code_execution: false,
        }),
        ToolInput::Json(Value::Array(items)) => {
            for item in items {
                flatten(ToolInput::Json(item), out)?;
            }
        }
        ToolInput::Json(v) => out.push(tool_from_json(v)?),
        ToolInput::CodeExecution => out.push(LibraryTool {
            declarations: Vec::new(),
            code_execution: true,
        }),
        ToolInput::Many(items) => {
            // Bare declarations in a list share one tool.
            let mut shared = LibraryTool::default();
            for item in items {
                match item {
                    ToolInput::Declaration(d) => shared.declarations.push(Declared::Plain(d)),
                    ToolInput::Callable(c) => shared.declarations.push(Declared::Callable(c)),
                    other => flatten(other, out)?,
                }
            }
            if !shared.declarations.is_empty() {
                out.push(shared);
            }
        }
    }
    Ok(())
}

/// The merged set of tools for a model, with globally unique function names.
#[derive(Debug, Clone, Default)]
pub struct FunctionLibrary {
    tools: Vec<LibraryTool>,
    index: BTreeMap<String, (usize, usize)>,
}

impl FunctionLibrary {
    pub fn new(input: impl Into<ToolInput>) -> Result<Self> {
        let mut tools = Vec::new();
        flatten(input.into(), &mut tools)?;
        let mut index = BTreeMap::new();
        for (ti, tool) in tools.iter().enumerate() {
            for (di, declared) in tool.declarations.iter().enumerate() {
                let name = declared.declaration().name.clone();
                if index.insert(name.clone(), (ti, di)).is_some() {
                    return Err(Error::invalid_input_with_context(
                        format!("duplicate function name `{}`", name),
                        ErrorContext::new()
                            .with_field_path("tools")
                            .with_source("function_library"),
                    ));
                }
            }
        }
        debug!(tools = tools.len(), functions = index.len(), "built function library");
        Ok(Self { tools, index })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDeclaration> {
        self.index
            .get(name)
            .map(|&(ti, di)| self.tools[ti].declarations[di].declaration())
    }

    /// The local handler for `name`, if it was declared as callable.
    pub fn callable(&self, name: &str) -> Option<&CallableFunctionDeclaration> {
        let &(ti, di) = self.index.get(name)?;
        match &self.tools[ti].declarations[di] {
            Declared::Callable(c) => Some(c),
            Declared::Plain(_) => None,
        }
    }

    /// Execute a function call locally. `None` when no callable handles it.
    pub fn call(&self, call: &FunctionCall) -> Option<Result<Part>> {
        let callable = self.callable(&call.name)?;
        debug!(function = %call.name, "invoking local function");
        Some(callable.call(&call.args))
    }

    /// Wire form of the library.
    pub fn to_proto(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| Tool {
                function_declarations: t
                    .declarations
                    .iter()
                    .map(|d| d.declaration().clone())
                    .collect(),
                code_execution: t.code_execution.then(CodeExecution::default),
            })
            .collect()
    }
}

/// Anything that can become a [`ToolConfig`].
#[derive(Debug, Clone)]
pub enum ToolConfigInput {
    Config(ToolConfig),
    Mode(FunctionCallingMode),
    /// A mode name such as `"any"` or `"FUNCTION_CALLING_MODE_NONE"`.
    Name(String),
    /// `{"function_calling_config": {"mode": ..., "allowed_function_names": [...]}}` or the
    /// inner object alone.
    Json(Value),
}

impl From<ToolConfig> for ToolConfigInput {
    fn from(c: ToolConfig) -> Self {
        ToolConfigInput::Config(c)
    }
}

impl From<FunctionCallingMode> for ToolConfigInput {
    fn from(m: FunctionCallingMode) -> Self {
        ToolConfigInput::Mode(m)
    }
}

impl From<&str> for ToolConfigInput {
    fn from(s: &str) -> Self {
        ToolConfigInput::Name(s.to_string())
    }
}

impl From<Value> for ToolConfigInput {
    fn from(v: Value) -> Self {
        ToolConfigInput::Json(v)
    }
}

fn unknown_mode(raw: &str) -> Error {
    Error::invalid_input_with_context(
        format!("unknown function calling mode `{}`", raw),
        ErrorContext::new()
            .with_field_path("tool_config.function_calling_config.mode")
            .with_source("tool_config"),
    )
}

fn parse_mode(raw: &str) -> Result<FunctionCallingMode> {
    FunctionCallingMode::parse(raw).ok_or_else(|| unknown_mode(raw))
}

/// Coerce and canonicalize a tool config. `allowed_function_names` only applies with
/// [`FunctionCallingMode::Any`] and is dropped otherwise.
pub fn to_tool_config(input: impl Into<ToolConfigInput>) -> Result<ToolConfig> {
    let mut config = match input.into() {
        ToolConfigInput::Config(c) => c,
        ToolConfigInput::Mode(m) => ToolConfig::new(m),
        ToolConfigInput::Name(s) => ToolConfig::new(parse_mode(&s)?),
        ToolConfigInput::Json(v) => {
            let inner = v
                .get("function_calling_config")
                .or_else(|| v.get("functionCallingConfig"))
                .unwrap_or(&v);
            let mode = match inner.get("mode") {
                Some(Value::String(s)) => parse_mode(s)?,
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(0) => FunctionCallingMode::Unspecified,
                    Some(1) => FunctionCallingMode::Auto,
                    Some(2) => FunctionCallingMode::Any,
                    Some(3) => FunctionCallingMode::None,
                    _ => return Err(unknown_mode(&n.to_string())),
                },
                None => FunctionCallingMode::Auto,
                Some(other) => return Err(unknown_mode(&other.to_string())),
            };
            let names = inner
                .get("allowed_function_names")
                .or_else(|| inner.get("allowedFunctionNames"))
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            ToolConfig::new(mode).with_allowed_function_names(names)
        }
    };
    let fcc = &mut config.function_calling_config;
    if fcc.mode != FunctionCallingMode::Any && !fcc.allowed_function_names.is_empty() {
        debug!(
            mode = ?fcc.mode,
            names = ?fcc.allowed_function_names,
            "allowed_function_names only applies with mode ANY; dropping"
        );
        fcc.allowed_function_names.clear();
    }
    Ok(config)
}
