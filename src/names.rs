//! Resource-name grammar.
//!
//! ```text
//! models/<id> | tunedModels/<slug>
//! files/<slug>
//! cachedContents/<[a-z0-9.-]+>
//! corpora/<slug>[/documents/<slug>[/chunks/<slug>]]
//! <resource>/permissions/<id>
//! ```
//!
//! Slugs match `[a-z0-9](-?[a-z0-9])*` and are at most 40 characters. Violations fail with
//! `InvalidInput` before any request is issued.

use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_SLUG_LEN: usize = 40;

static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9](-?[a-z0-9])*$").expect("slug regex"));
static CACHE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9.\-]+$").expect("cache id regex"));
static MODEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").expect("model id regex"));
static PERMISSION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").expect("permission id regex"));

fn invalid(kind: &str, name: &str, why: impl Into<String>) -> Error {
    Error::invalid_input_with_context(
        format!("invalid {} name `{}`", kind, name),
        ErrorContext::new()
            .with_details(why)
            .with_source("resource_names"),
    )
}

/// Validate a single slug segment.
pub fn validate_slug(kind: &str, slug: &str) -> Result<()> {
    if slug.len() > MAX_SLUG_LEN {
        return Err(invalid(
            kind,
            slug,
            format!("length {} exceeds {} characters", slug.len(), MAX_SLUG_LEN),
        ));
    }
    if !SLUG.is_match(slug) {
        return Err(invalid(
            kind,
            slug,
            "must be lowercase alphanumeric with single dashes, not starting or ending with a dash",
        ));
    }
    Ok(())
}

/// Normalize a model reference: bare ids gain the `models/` prefix; `tunedModels/` names are
/// validated as slugs.
pub fn model_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("model", name, "model name is empty"));
    }
    if let Some(slug) = name.strip_prefix("tunedModels/") {
        validate_slug("tuned model", slug)?;
        return Ok(name.to_string());
    }
    let id = name.strip_prefix("models/").unwrap_or(name);
    if !MODEL_ID.is_match(id) {
        return Err(invalid("model", name, "unexpected characters in model id"));
    }
    Ok(format!("models/{}", id))
}

pub fn tuned_model_name(name: &str) -> Result<String> {
    let slug = name.strip_prefix("tunedModels/").unwrap_or(name);
    validate_slug("tuned model", slug)?;
    Ok(format!("tunedModels/{}", slug))
}

pub fn file_name(name: &str) -> Result<String> {
    let id = name.strip_prefix("files/").unwrap_or(name);
    validate_slug("file", id)?;
    Ok(format!("files/{}", id))
}

pub fn cached_content_name(name: &str) -> Result<String> {
    let id = name.strip_prefix("cachedContents/").unwrap_or(name);
    if id.is_empty() || !CACHE_ID.is_match(id) {
        return Err(invalid(
            "cached content",
            name,
            "id must match [a-z0-9.-]+",
        ));
    }
    Ok(format!("cachedContents/{}", id))
}

pub fn corpus_name(name: &str) -> Result<String> {
    let slug = name.strip_prefix("corpora/").unwrap_or(name);
    validate_slug("corpus", slug)?;
    Ok(format!("corpora/{}", slug))
}

/// Validate `corpora/<slug>/documents/<slug>`.
pub fn document_name(name: &str) -> Result<String> {
    let segments: Vec<&str> = name.split('/').collect();
    match segments.as_slice() {
        ["corpora", corpus, "documents", doc] => {
            validate_slug("corpus", corpus)?;
            validate_slug("document", doc)?;
            Ok(name.to_string())
        }
        _ => Err(invalid(
            "document",
            name,
            "expected corpora/<corpus>/documents/<document>",
        )),
    }
}

/// Validate `corpora/<slug>/documents/<slug>/chunks/<slug>`.
pub fn chunk_name(name: &str) -> Result<String> {
    let segments: Vec<&str> = name.split('/').collect();
    match segments.as_slice() {
        ["corpora", corpus, "documents", doc, "chunks", chunk] => {
            validate_slug("corpus", corpus)?;
            validate_slug("document", doc)?;
            validate_slug("chunk", chunk)?;
            Ok(name.to_string())
        }
        _ => Err(invalid(
            "chunk",
            name,
            "expected corpora/<corpus>/documents/<document>/chunks/<chunk>",
        )),
    }
}

/// A resource that can carry permissions.
pub fn permission_parent(name: &str) -> Result<String> {
    if name.starts_with("tunedModels/") {
        return tuned_model_name(name);
    }
    if name.starts_with("corpora/") {
        return corpus_name(name);
    }
    Err(invalid(
        "permission parent",
        name,
        "permissions exist on tunedModels/<slug> or corpora/<slug>",
    ))
}

/// Validate `<tunedModels|corpora>/<slug>/permissions/<id>`.
pub fn permission_name(name: &str) -> Result<String> {
    let (parent, id) = name
        .rsplit_once("/permissions/")
        .ok_or_else(|| invalid("permission", name, "expected <resource>/permissions/<id>"))?;
    permission_parent(parent)?;
    if !PERMISSION_ID.is_match(id) {
        return Err(invalid("permission", name, "unexpected characters in permission id"));
    }
    Ok(name.to_string())
}

/// Join a parent name with a child collection and optional id, validating the id as a slug.
pub(crate) fn child_name(
    parent: &str,
    collection: &str,
    kind: &str,
    id: Option<&str>,
) -> Result<Option<String>> {
    match id {
        None => Ok(None),
        Some(raw) => {
            let prefix = format!("{}/{}/", parent, collection);
            let slug = raw.strip_prefix(&prefix).unwrap_or(raw);
            validate_slug(kind, slug)?;
            Ok(Some(format!("{}{}", prefix, slug)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_length_boundary() {
        let ok = "a".repeat(40);
        let too_long = "a".repeat(41);
        assert!(validate_slug("corpus", &ok).is_ok());
        assert!(matches!(
            validate_slug("corpus", &too_long),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_slug_shape() {
        assert!(validate_slug("corpus", "my-corpus-1").is_ok());
        assert!(validate_slug("corpus", "My-Corpus").is_err());
        assert!(validate_slug("corpus", "-leading").is_err());
        assert!(validate_slug("corpus", "double--dash").is_err());
        assert!(validate_slug("corpus", "trailing-").is_err());
        assert!(validate_slug("corpus", "").is_err());
    }

    #[test]
    fn test_model_name_prefixing() {
        assert_eq!(model_name("gemini-1.5-flash").unwrap(), "models/gemini-1.5-flash");
        assert_eq!(model_name("models/M").unwrap(), "models/M");
        assert_eq!(model_name("tunedModels/my-model").unwrap(), "tunedModels/my-model");
        assert!(model_name("tunedModels/Bad_Name").is_err());
        assert!(model_name("").is_err());
    }

    #[test]
    fn test_nested_names() {
        assert!(document_name("corpora/c1/documents/d1").is_ok());
        assert!(document_name("corpora/c1/docs/d1").is_err());
        assert!(chunk_name("corpora/c1/documents/d1/chunks/x").is_ok());
        assert!(chunk_name("corpora/c1/documents/D1/chunks/x").is_err());
        assert_eq!(corpus_name("abc").unwrap(), "corpora/abc");
    }

    #[test]
    fn test_cached_content_names() {
        assert_eq!(cached_content_name("abc.1-2").unwrap(), "cachedContents/abc.1-2");
        assert!(cached_content_name("cachedContents/ABC").is_err());
        assert!(cached_content_name("cachedContents/").is_err());
    }

    #[test]
    fn test_permission_names() {
        assert!(permission_name("tunedModels/m1/permissions/123abc").is_ok());
        assert!(permission_name("corpora/c/permissions/p-1").is_ok());
        assert!(permission_name("files/f/permissions/p").is_err());
        assert!(permission_name("corpora/c").is_err());
    }

    #[test]
    fn test_child_name() {
        assert_eq!(
            child_name("corpora/c", "documents", "document", Some("d")).unwrap(),
            Some("corpora/c/documents/d".to_string())
        );
        assert_eq!(
            child_name("corpora/c", "documents", "document", Some("corpora/c/documents/d"))
                .unwrap(),
            Some("corpora/c/documents/d".to_string())
        );
        assert!(child_name("corpora/c", "documents", "document", Some("D")).is_err());
    }
}
