//! Mapping of HTTP failures and Google API error bodies onto [`Error::Remote`].
//!
//! The `error.status` string of the body is authoritative; the HTTP status code is the
//! fallback when the body is missing or not JSON.

use serde_json::Value;

use crate::error::RemoteKind;
use crate::Error;

pub(crate) fn kind_from_status_name(name: &str) -> Option<RemoteKind> {
    let kind = match name {
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => RemoteKind::InvalidArgument,
        "FAILED_PRECONDITION" => RemoteKind::FailedPrecondition,
        "UNAUTHENTICATED" => RemoteKind::Unauthenticated,
        "PERMISSION_DENIED" => RemoteKind::PermissionDenied,
        "NOT_FOUND" => RemoteKind::NotFound,
        "ALREADY_EXISTS" | "ABORTED" => RemoteKind::AlreadyExists,
        "RESOURCE_EXHAUSTED" => RemoteKind::ResourceExhausted,
        "CANCELLED" => RemoteKind::Cancelled,
        "DEADLINE_EXCEEDED" => RemoteKind::DeadlineExceeded,
        "UNAVAILABLE" => RemoteKind::Unavailable,
        "INTERNAL" | "DATA_LOSS" => RemoteKind::Internal,
        "UNKNOWN" | "UNIMPLEMENTED" => RemoteKind::Unknown,
        _ => return None,
    };
    Some(kind)
}

pub(crate) fn kind_from_http_status(status: u16) -> RemoteKind {
    match status {
        400 => RemoteKind::InvalidArgument,
        401 => RemoteKind::Unauthenticated,
        403 => RemoteKind::PermissionDenied,
        404 => RemoteKind::NotFound,
        409 => RemoteKind::AlreadyExists,
        412 => RemoteKind::FailedPrecondition,
        429 => RemoteKind::ResourceExhausted,
        499 => RemoteKind::Cancelled,
        500 => RemoteKind::Internal,
        503 => RemoteKind::Unavailable,
        504 => RemoteKind::DeadlineExceeded,
        _ => RemoteKind::Unknown,
    }
}

/// Classify an `{"error": {"code", "message", "status"}}` object (or its inner value).
pub(crate) fn classify_error_value(
    http_status: Option<u16>,
    body: &Value,
    retry_after_ms: Option<u32>,
) -> Error {
    let inner = body.get("error").unwrap_or(body);
    let code = inner
        .get("code")
        .and_then(|c| c.as_u64())
        .map(|c| c as u16)
        .or(http_status)
        .unwrap_or(0);
    let kind = inner
        .get("status")
        .and_then(|s| s.as_str())
        .and_then(kind_from_status_name)
        .unwrap_or_else(|| kind_from_http_status(code));
    let message = inner
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("request failed with status {}", code));
    Error::Remote {
        status: http_status.unwrap_or(code),
        kind,
        message,
        retryable: kind.retryable(),
        retry_after_ms,
    }
}

/// Canonical RPC code (`google.rpc.Code`) as carried by a failed long-running operation.
pub(crate) fn kind_from_rpc_code(code: i64) -> RemoteKind {
    match code {
        1 => RemoteKind::Cancelled,
        2 | 12 => RemoteKind::Unknown,
        3 | 11 => RemoteKind::InvalidArgument,
        4 => RemoteKind::DeadlineExceeded,
        5 => RemoteKind::NotFound,
        6 | 10 => RemoteKind::AlreadyExists,
        7 => RemoteKind::PermissionDenied,
        8 => RemoteKind::ResourceExhausted,
        9 => RemoteKind::FailedPrecondition,
        13 | 15 => RemoteKind::Internal,
        14 => RemoteKind::Unavailable,
        16 => RemoteKind::Unauthenticated,
        _ => RemoteKind::Unknown,
    }
}

/// Classify the `error` status of a finished operation. There is no HTTP status, so
/// `Error::Remote::status` is 0.
pub(crate) fn classify_operation_error(status: &Value) -> Error {
    let kind = status
        .get("code")
        .and_then(Value::as_i64)
        .map(kind_from_rpc_code)
        .unwrap_or(RemoteKind::Unknown);
    let message = status
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("operation failed")
        .to_string();
    Error::Remote {
        status: 0,
        kind,
        message,
        retryable: false,
        retry_after_ms: None,
    }
}

/// Classify a failed HTTP response from its status code and raw body text.
pub(crate) fn classify_http(status: u16, body: &str, retry_after_ms: Option<u32>) -> Error {
    match serde_json::from_str::<Value>(body) {
        Ok(v) if v.get("error").is_some() => classify_error_value(Some(status), &v, retry_after_ms),
        _ => {
            let kind = kind_from_http_status(status);
            let message = if body.trim().is_empty() {
                format!("request failed with status {}", status)
            } else {
                body.trim().chars().take(512).collect()
            };
            Error::Remote {
                status,
                kind,
                message,
                retryable: kind.retryable(),
                retry_after_ms,
            }
        }
    }
}

/// `Retry-After` in delta-seconds form, as milliseconds.
pub(crate) fn parse_retry_after(raw: &str) -> Option<u32> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs.is_sign_negative() {
        return None;
    }
    Some((secs * 1000.0).min(u32::MAX as f64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_name_wins_over_code() {
        let err = classify_http(
            400,
            &json!({"error": {"code": 400, "message": "gone", "status": "NOT_FOUND"}}).to_string(),
            None,
        );
        assert!(err.is_not_found());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_plain_body_falls_back_to_http_status() {
        let err = classify_http(503, "upstream overloaded", Some(2000));
        match err {
            Error::Remote {
                kind,
                retryable,
                retry_after_ms,
                ..
            } => {
                assert_eq!(kind, RemoteKind::Unavailable);
                assert!(retryable);
                assert_eq!(retry_after_ms, Some(2000));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_is_resource_exhausted() {
        let err = classify_http(429, "", None);
        assert!(err.is_resource_exhausted());
        assert!(err.is_retryable());
        assert!(!classify_http(400, "", None).is_retryable());
    }

    #[test]
    fn test_stream_error_frame() {
        let err = classify_error_value(
            None,
            &json!({"error": {"code": 500, "message": "boom", "status": "INTERNAL"}}),
            None,
        );
        assert_eq!(err.remote_kind(), Some(RemoteKind::Internal));
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(parse_retry_after("2"), Some(2000));
        assert_eq!(parse_retry_after("0.5"), Some(500));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_operation_error_uses_rpc_codes() {
        let err = classify_operation_error(&json!({"code": 1, "message": "user cancelled"}));
        assert_eq!(err.remote_kind(), Some(RemoteKind::Cancelled));
        let err = classify_operation_error(&json!({"code": 3, "message": "bad examples"}));
        assert_eq!(err.remote_kind(), Some(RemoteKind::InvalidArgument));
        assert!(err.to_string().contains("bad examples"));
    }
}
