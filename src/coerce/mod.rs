//! Coercion of permissive user inputs into the canonical wire types.
//!
//! Every function here is synchronous and validates before anything is sent.

pub mod content;
pub mod generation;
pub mod safety;
pub mod schema;
pub mod tools;

pub use content::{to_content, to_contents, to_part, ContentInput, ImageInput, PartInput};
pub use generation::{
    merge_generation, to_generation_config, validate_generation_config, GenerationConfigInput,
};
pub use safety::{
    merge_safety, normalize_safety, to_category, to_threshold, CategoryInput, SafetyInput,
    ThresholdInput,
};
pub use schema::{normalize_json_schema, schema_for};
pub use tools::{
    to_tool_config, CallableFunctionDeclaration, FunctionLibrary, ToolConfigInput, ToolInput,
};
