//! Wire encodings shared by the API types.
//!
//! The REST surface carries raw bytes as base64 strings, 64-bit integers as decimal
//! strings and durations as `"<seconds>s"` strings.

use serde::{Deserialize, Deserializer, Serializer};

/// `Vec<u8>` <-> standard base64 string.
pub mod base64_bytes {
    use super::*;
    use base64::Engine as _;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        let engine = base64::engine::general_purpose::STANDARD;
        engine
            .decode(raw.as_bytes())
            .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(raw.as_bytes()))
            .map_err(serde::de::Error::custom)
    }
}

/// `Option<i64>` accepting either a JSON number or a decimal string.
pub mod opt_i64_string {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(v: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(n) => s.serialize_str(&n.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            None => Ok(None),
            Some(Raw::Num(n)) => Ok(Some(n)),
            Some(Raw::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// Render a duration as the wire `"<seconds>s"` form.
pub fn duration_to_wire(d: std::time::Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}.{:09}s", d.as_secs(), d.subsec_nanos())
    }
}

/// Parse the wire `"<seconds>s"` duration form.
pub fn duration_from_wire(raw: &str) -> Option<std::time::Duration> {
    let secs = raw.trim().strip_suffix('s')?;
    let value: f64 = secs.parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some(std::time::Duration::from_secs_f64(value))
}

/// `Option<Duration>` as the wire `"<seconds>s"` string.
pub mod opt_duration {
    use super::*;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_str(&duration_to_wire(*d)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => duration_from_wire(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration `{}`", raw))),
        }
    }
}
