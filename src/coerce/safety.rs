//! Safety-setting coercion.
//!
//! Category and threshold tokens resolve in order: enum value, canonical wire name,
//! abbreviation, legacy short name, integer ordinal. Resolution is alias-stable:
//! normalizing an alias and normalizing its canonical name give the same setting.

use serde_json::Value;

use crate::types::{HarmBlockThreshold, HarmCategory, SafetySetting};
use crate::{Error, ErrorContext, Result};

const CATEGORY_ALIASES: &[(&str, HarmCategory)] = &[
    ("unspecified", HarmCategory::Unspecified),
    ("harassment", HarmCategory::Harassment),
    ("harass", HarmCategory::Harassment),
    ("hate", HarmCategory::HateSpeech),
    ("hate_speech", HarmCategory::HateSpeech),
    ("hatespeech", HarmCategory::HateSpeech),
    ("sex", HarmCategory::SexuallyExplicit),
    ("sexual", HarmCategory::SexuallyExplicit),
    ("sexually_explicit", HarmCategory::SexuallyExplicit),
    ("danger", HarmCategory::DangerousContent),
    ("dangerous", HarmCategory::DangerousContent),
    ("dangerous_content", HarmCategory::DangerousContent),
    ("civic", HarmCategory::CivicIntegrity),
    ("civic_integrity", HarmCategory::CivicIntegrity),
];

/// Short names of the older text-model categories that no abbreviation claims.
const LEGACY_CATEGORIES: &[(&str, HarmCategory)] = &[
    ("derogatory", HarmCategory::Derogatory),
    ("toxicity", HarmCategory::Toxicity),
    ("violence", HarmCategory::Violence),
    ("medical", HarmCategory::Medical),
];

const THRESHOLD_ALIASES: &[(&str, HarmBlockThreshold)] = &[
    ("unspecified", HarmBlockThreshold::Unspecified),
    ("block_threshold_unspecified", HarmBlockThreshold::Unspecified),
    ("low", HarmBlockThreshold::BlockLowAndAbove),
    ("low_and_above", HarmBlockThreshold::BlockLowAndAbove),
    ("block_low_and_above", HarmBlockThreshold::BlockLowAndAbove),
    ("med", HarmBlockThreshold::BlockMediumAndAbove),
    ("medium", HarmBlockThreshold::BlockMediumAndAbove),
    ("medium_and_above", HarmBlockThreshold::BlockMediumAndAbove),
    ("block_medium_and_above", HarmBlockThreshold::BlockMediumAndAbove),
    ("high", HarmBlockThreshold::BlockOnlyHigh),
    ("only_high", HarmBlockThreshold::BlockOnlyHigh),
    ("block_only_high", HarmBlockThreshold::BlockOnlyHigh),
    ("none", HarmBlockThreshold::BlockNone),
    ("block_none", HarmBlockThreshold::BlockNone),
    ("off", HarmBlockThreshold::Off),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryInput {
    Category(HarmCategory),
    Name(String),
    Ordinal(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdInput {
    Threshold(HarmBlockThreshold),
    Name(String),
    Ordinal(i64),
}

impl From<HarmCategory> for CategoryInput {
    fn from(c: HarmCategory) -> Self {
        CategoryInput::Category(c)
    }
}

impl From<&str> for CategoryInput {
    fn from(s: &str) -> Self {
        CategoryInput::Name(s.to_string())
    }
}

impl From<String> for CategoryInput {
    fn from(s: String) -> Self {
        CategoryInput::Name(s)
    }
}

impl From<i64> for CategoryInput {
    fn from(n: i64) -> Self {
        CategoryInput::Ordinal(n)
    }
}

impl From<HarmBlockThreshold> for ThresholdInput {
    fn from(t: HarmBlockThreshold) -> Self {
        ThresholdInput::Threshold(t)
    }
}

impl From<&str> for ThresholdInput {
    fn from(s: &str) -> Self {
        ThresholdInput::Name(s.to_string())
    }
}

impl From<String> for ThresholdInput {
    fn from(s: String) -> Self {
        ThresholdInput::Name(s)
    }
}

impl From<i64> for ThresholdInput {
    fn from(n: i64) -> Self {
        ThresholdInput::Ordinal(n)
    }
}

/// Anything that can become a list of [`SafetySetting`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyInput {
    Map(Vec<(CategoryInput, ThresholdInput)>),
    List(Vec<SafetySetting>),
    Single(SafetySetting),
    /// `{"harassment": "low", ...}` or `[{"category": ..., "threshold": ...}, ...]`.
    Json(Value),
}

impl From<SafetySetting> for SafetyInput {
    fn from(s: SafetySetting) -> Self {
        SafetyInput::Single(s)
    }
}

impl From<Vec<SafetySetting>> for SafetyInput {
    fn from(v: Vec<SafetySetting>) -> Self {
        SafetyInput::List(v)
    }
}

impl<C: Into<CategoryInput>, T: Into<ThresholdInput>> From<Vec<(C, T)>> for SafetyInput {
    fn from(v: Vec<(C, T)>) -> Self {
        SafetyInput::Map(v.into_iter().map(|(c, t)| (c.into(), t.into())).collect())
    }
}

impl From<Value> for SafetyInput {
    fn from(v: Value) -> Self {
        SafetyInput::Json(v)
    }
}

fn invalid(field: &str, msg: String) -> Error {
    Error::invalid_input_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("safety_settings"),
    )
}

fn token(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

pub fn to_category(input: impl Into<CategoryInput>) -> Result<HarmCategory> {
    match input.into() {
        CategoryInput::Category(c) => Ok(c),
        CategoryInput::Ordinal(n) => HarmCategory::from_ordinal(n)
            .ok_or_else(|| invalid("category", format!("unknown harm category ordinal {}", n))),
        CategoryInput::Name(name) => {
            let t = token(&name);
            if let Some(c) = HarmCategory::ALL
                .iter()
                .find(|c| c.as_str().eq_ignore_ascii_case(&t))
            {
                return Ok(*c);
            }
            let bare = t.strip_prefix("harm_category_").unwrap_or(&t);
            CATEGORY_ALIASES
                .iter()
                .chain(LEGACY_CATEGORIES.iter())
                .find(|(alias, _)| *alias == bare)
                .map(|(_, c)| *c)
                .or_else(|| t.parse::<i64>().ok().and_then(HarmCategory::from_ordinal))
                .ok_or_else(|| invalid("category", format!("unknown harm category `{}`", name)))
        }
    }
}

pub fn to_threshold(input: impl Into<ThresholdInput>) -> Result<HarmBlockThreshold> {
    match input.into() {
        ThresholdInput::Threshold(t) => Ok(t),
        ThresholdInput::Ordinal(n) => HarmBlockThreshold::from_ordinal(n).ok_or_else(|| {
            invalid("threshold", format!("unknown block threshold ordinal {}", n))
        }),
        ThresholdInput::Name(name) => {
            let t = token(&name);
            if let Some(th) = HarmBlockThreshold::ALL
                .iter()
                .find(|th| th.as_str().eq_ignore_ascii_case(&t))
            {
                return Ok(*th);
            }
            let bare = t.strip_prefix("harm_").unwrap_or(&t);
            THRESHOLD_ALIASES
                .iter()
                .find(|(alias, _)| *alias == bare)
                .map(|(_, th)| *th)
                .or_else(|| t.parse::<i64>().ok().and_then(HarmBlockThreshold::from_ordinal))
                .ok_or_else(|| invalid("threshold", format!("unknown block threshold `{}`", name)))
        }
    }
}

fn category_from_json(v: &Value) -> Result<HarmCategory> {
    match v {
        Value::String(s) => to_category(s.as_str()),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid("category", format!("unknown harm category {}", n)))
            .and_then(|n| to_category(n)),
        other => Err(invalid("category", format!("unknown harm category {}", other))),
    }
}

fn threshold_from_json(v: &Value) -> Result<HarmBlockThreshold> {
    match v {
        Value::String(s) => to_threshold(s.as_str()),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid("threshold", format!("unknown block threshold {}", n)))
            .and_then(|n| to_threshold(n)),
        other => Err(invalid("threshold", format!("unknown block threshold {}", other))),
    }
}

fn push_setting(out: &mut Vec<SafetySetting>, setting: SafetySetting) {
    match out.iter_mut().find(|s| s.category == setting.category) {
        Some(existing) => existing.threshold = setting.threshold,
        None => out.push(setting),
    }
}

/// Canonical settings; duplicate categories keep the last threshold in first-seen order.
pub fn normalize_safety(input: impl Into<SafetyInput>) -> Result<Vec<SafetySetting>> {
    let mut out = Vec::new();
    match input.into() {
        SafetyInput::Single(s) => out.push(s),
        SafetyInput::List(list) => {
            for s in list {
                push_setting(&mut out, s);
            }
        }
        SafetyInput::Map(pairs) => {
            for (c, t) in pairs {
                push_setting(&mut out, SafetySetting::new(to_category(c)?, to_threshold(t)?));
            }
        }
        SafetyInput::Json(Value::Object(map)) => {
            if let (Some(c), Some(t)) = (map.get("category"), map.get("threshold")) {
                out.push(SafetySetting::new(category_from_json(c)?, threshold_from_json(t)?));
            } else {
                for (c, t) in &map {
                    push_setting(
                        &mut out,
                        SafetySetting::new(to_category(c.as_str())?, threshold_from_json(t)?),
                    );
                }
            }
        }
        SafetyInput::Json(Value::Array(items)) => {
            for item in &items {
                let (c, t) = match (item.get("category"), item.get("threshold")) {
                    (Some(c), Some(t)) => (c, t),
                    _ => {
                        return Err(invalid(
                            "safety_settings",
                            format!("expected {{category, threshold}}, got {}", item),
                        ))
                    }
                };
                push_setting(
                    &mut out,
                    SafetySetting::new(category_from_json(c)?, threshold_from_json(t)?),
                );
            }
        }
        SafetyInput::Json(Value::Null) => {}
        SafetyInput::Json(other) => {
            return Err(invalid(
                "safety_settings",
                format!("cannot build safety settings from {}", other),
            ))
        }
    }
    Ok(out)
}

/// Per-category merge: `overrides` replace `base` thresholds, new categories are appended.
pub fn merge_safety(base: &[SafetySetting], overrides: &[SafetySetting]) -> Vec<SafetySetting> {
    let mut out = base.to_vec();
    for s in overrides {
        push_setting(&mut out, *s);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(to_category("harassment").unwrap(), HarmCategory::Harassment);
        assert_eq!(to_category("HATE").unwrap(), HarmCategory::HateSpeech);
        assert_eq!(to_category("sex").unwrap(), HarmCategory::SexuallyExplicit);
        assert_eq!(to_category("danger").unwrap(), HarmCategory::DangerousContent);
        assert_eq!(
            to_category("HARM_CATEGORY_DANGEROUS").unwrap(),
            HarmCategory::Dangerous
        );
        assert_eq!(to_category("medical").unwrap(), HarmCategory::Medical);
        assert_eq!(to_category(7i64).unwrap(), HarmCategory::Harassment);
        assert_eq!(to_threshold("low").unwrap(), HarmBlockThreshold::BlockLowAndAbove);
        assert_eq!(to_threshold("MED").unwrap(), HarmBlockThreshold::BlockMediumAndAbove);
        assert_eq!(to_threshold("block_none").unwrap(), HarmBlockThreshold::BlockNone);
        assert_eq!(to_threshold(3i64).unwrap(), HarmBlockThreshold::BlockOnlyHigh);
    }

    #[test]
    fn test_unknown_tokens_fail() {
        assert!(to_category("spicy").is_err());
        assert!(to_category(99i64).is_err());
        assert!(to_threshold("sometimes").is_err());
    }

    #[test]
    fn test_alias_stability() {
        for alias in ["harassment", "hate", "sex", "danger", "civic", "medical"] {
            let c = to_category(alias).unwrap();
            assert_eq!(to_category(c.as_str()).unwrap(), c);
        }
        for alias in ["low", "med", "high", "none", "off"] {
            let t = to_threshold(alias).unwrap();
            assert_eq!(to_threshold(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn test_later_duplicates_win() {
        let out = normalize_safety(vec![("harassment", "low"), ("hate", "high"), ("harass", "none")])
            .unwrap();
        assert_eq!(
            out,
            vec![
                SafetySetting::new(HarmCategory::Harassment, HarmBlockThreshold::BlockNone),
                SafetySetting::new(HarmCategory::HateSpeech, HarmBlockThreshold::BlockOnlyHigh),
            ]
        );
    }

    #[test]
    fn test_json_shapes() {
        let from_map = normalize_safety(json!({"danger": "high"})).unwrap();
        let from_list = normalize_safety(json!([
            {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": 3}
        ]))
        .unwrap();
        assert_eq!(from_map, from_list);
        assert!(normalize_safety(json!([{"category": "danger"}])).is_err());
        assert!(normalize_safety(json!(5)).is_err());
    }

    #[test]
    fn test_merge_overrides_per_category() {
        let base = normalize_safety(vec![("harassment", "low"), ("hate", "low")]).unwrap();
        let call = normalize_safety(vec![("hate", "none"), ("danger", "high")]).unwrap();
        let merged = merge_safety(&base, &call);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].threshold, HarmBlockThreshold::BlockLowAndAbove);
        assert_eq!(merged[1].threshold, HarmBlockThreshold::BlockNone);
        assert_eq!(merged[2].category, HarmCategory::DangerousContent);
    }
}
