//! Normalization of JSON Schema documents into the service's restricted [`Schema`] dialect.
//!
//! Accepts draft-07 output from `schemars` as well as schemas already in wire form, so the
//! operation is stable under re-normalization: `$ref`/`definitions` are inlined,
//! `title`/`additionalProperties`/`$schema` are dropped, `["T", "null"]` unions and
//! `anyOf: [T, {"type": "null"}]` become `nullable`.

use serde_json::{Map, Value};

use crate::types::{Schema, SchemaType};
use crate::{Error, ErrorContext, Result};

const MAX_DEPTH: usize = 32;

/// `format` values the service understands.
const KNOWN_FORMATS: [&str; 6] = ["int32", "int64", "float", "double", "date-time", "enum"];

fn invalid(path: &str, msg: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(if path.is_empty() { "<root>" } else { path })
            .with_source("schema_normalization"),
    )
}

/// Schema of a Rust type, normalized to the wire dialect.
pub fn schema_for<T: schemars::JsonSchema>() -> Result<Schema> {
    let root = schemars::schema_for!(T);
    let value = serde_json::to_value(&root)?;
    normalize_json_schema(&value)
}

/// Convert a JSON Schema value to a wire [`Schema`].
pub fn normalize_json_schema(root: &Value) -> Result<Schema> {
    let empty = Map::new();
    let defs = root
        .get("definitions")
        .or_else(|| root.get("$defs"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    convert(root, defs, "", 0)
}

fn resolve_ref<'a>(reference: &str, defs: &'a Map<String, Value>, path: &str) -> Result<&'a Value> {
    let name = reference
        .strip_prefix("#/definitions/")
        .or_else(|| reference.strip_prefix("#/$defs/"))
        .ok_or_else(|| invalid(path, format!("unsupported $ref `{}`", reference)))?;
    defs.get(name)
        .ok_or_else(|| invalid(path, format!("unresolved $ref `{}`", reference)))
}

fn is_null_schema(v: &Value) -> bool {
    v.get("type").and_then(Value::as_str) == Some("null")
}

fn convert(node: &Value, defs: &Map<String, Value>, path: &str, depth: usize) -> Result<Schema> {
    if depth > MAX_DEPTH {
        return Err(invalid(path, "schema nesting too deep (recursive types are not supported)"));
    }
    let obj = match node {
        Value::Object(obj) => obj,
        _ => return Err(invalid(path, "property has no declared type")),
    };
    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        let target = resolve_ref(reference, defs, path)?;
        let mut schema = convert(target, defs, path, depth + 1)?;
        if description.is_some() {
            schema.description = description;
        }
        return Ok(schema);
    }

    if let Some(Value::Array(members)) = obj.get("allOf") {
        if members.len() != 1 {
            return Err(invalid(path, "allOf with several members is not supported"));
        }
        let mut schema = convert(&members[0], defs, path, depth + 1)?;
        if description.is_some() {
            schema.description = description;
        }
        return Ok(schema);
    }

    for key in ["anyOf", "oneOf"] {
        if let Some(Value::Array(members)) = obj.get(key) {
            let has_null = members.iter().any(is_null_schema);
            let rest: Vec<&Value> = members.iter().filter(|m| !is_null_schema(m)).collect();
            if rest.len() != 1 {
                return Err(invalid(
                    path,
                    format!("{} unions of several non-null types are not supported", key),
                ));
            }
            let mut schema = convert(rest[0], defs, path, depth + 1)?;
            if has_null {
                schema.nullable = Some(true);
            }
            if description.is_some() {
                schema.description = description;
            }
            return Ok(schema);
        }
    }

    let mut nullable = obj.get("nullable").and_then(Value::as_bool).filter(|n| *n);
    let schema_type = match obj.get("type") {
        Some(Value::String(t)) => SchemaType::parse(t)
            .ok_or_else(|| invalid(path, format!("unsupported type `{}`", t)))?,
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            if names.contains(&"null") {
                nullable = Some(true);
            }
            let non_null: Vec<&str> = names.into_iter().filter(|t| *t != "null").collect();
            match non_null.as_slice() {
                [one] => SchemaType::parse(one)
                    .ok_or_else(|| invalid(path, format!("unsupported type `{}`", one)))?,
                _ => {
                    return Err(invalid(
                        path,
                        "type unions of several non-null types are not supported",
                    ))
                }
            }
        }
        None if obj.contains_key("properties") => SchemaType::Object,
        None if obj.contains_key("enum") => SchemaType::String,
        _ => return Err(invalid(path, "property has no declared type")),
    };

    let mut schema = Schema::new(schema_type);
    schema.description = description;
    schema.nullable = nullable;
    schema.format = obj
        .get("format")
        .and_then(Value::as_str)
        .filter(|f| KNOWN_FORMATS.contains(f))
        .map(str::to_string);

    if let Some(Value::Array(values)) = obj.get("enum") {
        for v in values {
            match v {
                Value::String(s) => schema.enum_values.push(s.clone()),
                Value::Null => schema.nullable = Some(true),
                other => {
                    return Err(invalid(
                        path,
                        format!("enum values must be strings, got {}", other),
                    ))
                }
            }
        }
        if schema_type == SchemaType::String && !schema.enum_values.is_empty() {
            schema.format = Some("enum".to_string());
        }
    }

    if let Some(items) = obj.get("items") {
        let item_path = format!("{}[]", path);
        schema.items = Some(Box::new(convert(items, defs, &item_path, depth + 1)?));
    }

    if let Some(Value::Object(props)) = obj.get("properties") {
        for (name, prop) in props {
            let prop_path = if path.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", path, name)
            };
            let converted = convert(prop, defs, &prop_path, depth + 1)?;
            schema.properties.insert(name.clone(), converted);
        }
    }

    if let Some(Value::Array(required)) = obj.get("required") {
        schema.required = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|r| schema.properties.contains_key(*r))
            .map(str::to_string)
            .collect();
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Address {
        street: String,
    }

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    enum Unit {
        Celsius,
        Fahrenheit,
    }

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    /// Weather lookup.
    struct Lookup {
        /// City name.
        city: String,
        days: Option<u8>,
        unit: Unit,
        home: Option<Address>,
        tags: Vec<String>,
    }

    #[test]
    fn test_schemars_output_is_normalized() {
        let schema = schema_for::<Lookup>().unwrap();
        assert_eq!(schema.schema_type, SchemaType::Object);
        assert_eq!(schema.properties["city"].description.as_deref(), Some("City name."));
        assert_eq!(schema.properties["days"].nullable, Some(true));
        assert_eq!(schema.properties["days"].schema_type, SchemaType::Integer);
        assert_eq!(
            schema.properties["unit"].enum_values,
            vec!["Celsius".to_string(), "Fahrenheit".to_string()]
        );
        let home = &schema.properties["home"];
        assert_eq!(home.nullable, Some(true));
        assert_eq!(home.properties["street"].schema_type, SchemaType::String);
        assert_eq!(
            schema.properties["tags"].items.as_ref().unwrap().schema_type,
            SchemaType::String
        );
        assert!(schema.required.contains(&"city".to_string()));
        assert!(!schema.required.contains(&"days".to_string()));
    }

    #[test]
    fn test_normalization_is_stable() {
        let once = schema_for::<Lookup>().unwrap();
        let wire = serde_json::to_value(&once).unwrap();
        let twice = normalize_json_schema(&wire).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_untyped_property_is_rejected() {
        let err = normalize_json_schema(&json!({
            "type": "object",
            "properties": {"anything": true}
        }))
        .unwrap_err();
        match err {
            Error::InvalidInput { context, .. } => {
                assert_eq!(context.field_path.as_deref(), Some("anything"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_real_unions_are_rejected() {
        assert!(normalize_json_schema(&json!({"type": ["string", "integer"]})).is_err());
        assert!(normalize_json_schema(&json!({
            "anyOf": [{"type": "string"}, {"type": "integer"}]
        }))
        .is_err());
    }

    #[test]
    fn test_unknown_formats_are_dropped() {
        let s = normalize_json_schema(&json!({"type": "integer", "format": "uint8"})).unwrap();
        assert_eq!(s.format, None);
        let s = normalize_json_schema(&json!({"type": "integer", "format": "int64"})).unwrap();
        assert_eq!(s.format.as_deref(), Some("int64"));
    }
}
