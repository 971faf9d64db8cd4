//! Error types for the cohort client SDK.
//!
//! Three failure classes cover every fallible call:
//!
//! - [`Error::Unavailable`] — the daemon endpoint could not be reached, or it
//!   produced something that is not a valid protocol response. Locally
//!   terminal; the client never retries on its own.
//! - [`Error::Api`] — the daemon answered a well-formed request with
//!   `ok:false`. The daemon's `code`/`message`/`details` are propagated
//!   verbatim so callers can branch on the code.
//! - [`Error::Incompatible`] — the connected daemon failed compatibility
//!   negotiation. Treat as fatal to the session, not per-call.

use serde_json::Value;

use crate::protocol::{ErrorInfo, Response};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by the SDK.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Endpoint unreachable, transport-level failure, or a malformed
    /// response. Never a daemon-level rejection.
    #[error("daemon unavailable: {0}")]
    Unavailable(String),

    /// The daemon explicitly rejected the request (`ok:false`).
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The daemon does not satisfy the negotiated requirements.
    #[error("incompatible daemon: {0}")]
    Incompatible(String),
}

impl Error {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Error::Unavailable(reason.into())
    }
}

/// A structured `ok:false` rejection from the daemon.
///
/// `details` is whatever JSON object the daemon attached (empty object when
/// absent); `raw` keeps the full response envelope for diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Value,
    pub raw: Option<Response>,
}

impl ApiError {
    /// Build an [`ApiError`] from a decoded response envelope.
    ///
    /// Missing or malformed error fields degrade to placeholders rather than
    /// failing: an `ok:false` line with no usable `error` object still has to
    /// surface as an API rejection, not a transport error.
    pub fn from_response(response: Response) -> Self {
        let info = response.error.clone().unwrap_or_default();
        Self::from_error_info(info, Some(response))
    }

    pub(crate) fn from_error_info(info: ErrorInfo, raw: Option<Response>) -> Self {
        let ErrorInfo {
            code,
            message,
            details,
        } = info;
        let code = if code.is_empty() {
            "error".to_string()
        } else {
            code
        };
        let message = if message.is_empty() {
            "daemon error".to_string()
        } else {
            message
        };
        let details = match details {
            Some(d @ Value::Object(_)) => d,
            _ => Value::Object(serde_json::Map::new()),
        };
        Self {
            code,
            message,
            details,
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_defaults_for_empty_fields() {
        let err = ApiError::from_error_info(ErrorInfo::default(), None);
        assert_eq!(err.code, "error");
        assert_eq!(err.message, "daemon error");
        assert!(err.details.as_object().unwrap().is_empty());
    }

    #[test]
    fn api_error_keeps_structured_details() {
        let info = ErrorInfo {
            code: "missing_group_id".into(),
            message: "group_id is required".into(),
            details: Some(serde_json::json!({"field": "group_id"})),
        };
        let err = ApiError::from_error_info(info, None);
        assert_eq!(err.code, "missing_group_id");
        assert_eq!(err.details["field"], "group_id");
        assert_eq!(err.to_string(), "missing_group_id: group_id is required");
    }

    #[test]
    fn non_object_details_collapse_to_empty_map() {
        let info = ErrorInfo {
            code: "bad".into(),
            message: "oops".into(),
            details: Some(serde_json::json!([1, 2, 3])),
        };
        let err = ApiError::from_error_info(info, None);
        assert!(err.details.is_object());
    }
}
