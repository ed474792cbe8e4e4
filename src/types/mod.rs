//! Wire types of the generative language API.
//!
//! These mirror the service's published REST schema (camelCase JSON). They carry no
//! behaviour beyond small accessors; coercion from permissive inputs lives in
//! [`crate::coerce`], response aggregation in [`crate::response`].
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`content`] | [`Part`], [`Content`], [`Role`] and the payload types |
//! | [`generation`] | [`GenerationConfig`], [`GenerateContentRequest`], [`GenerateContentResponse`] |
//! | [`safety`] | Harm categories, thresholds and ratings |
//! | [`tool`] | [`Tool`], [`FunctionDeclaration`], [`Schema`], [`ToolConfig`] |

pub mod content;
pub mod generation;
pub mod safety;
pub(crate) mod serde_helpers;
pub mod tool;

pub use content::{
    Blob, CodeExecutionResult, Content, ExecutableCode, FileData, FunctionCall, FunctionResponse,
    Part, Role,
};
pub use generation::{
    BlockReason, Candidate, CitationMetadata, CitationSource, CountTokensResponse, FinishReason,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, PromptFeedback,
    UsageMetadata,
};
pub use safety::{HarmBlockThreshold, HarmCategory, HarmProbability, SafetyRating, SafetySetting};
pub use tool::{
    CodeExecution, FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, Schema,
    SchemaType, Tool, ToolConfig,
};
