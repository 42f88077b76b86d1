//! Typed failure taxonomy for the query pipeline.
//!
//! Every layer boundary (connector, safety gate, provider, pipeline)
//! returns [`QueryError`] so failure categories stay programmatically
//! distinguishable instead of being string-matched out of messages.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories surfaced by the pipeline.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Backend unreachable or authentication rejected. Never retried.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Candidate query violates the read-only policy. Never executed.
    #[error("query rejected by read-only policy: {0}")]
    SafetyViolation(String),

    /// Backend rejected or failed a validated query. Eligible for one heal.
    #[error("query execution failed: {0}")]
    Execution(String),

    /// Execution exceeded the configured bound.
    #[error("query exceeded {seconds} second limit")]
    Timeout {
        /// The configured limit that was exceeded.
        seconds: u64,
    },

    /// Language-model provider unreachable or returned unparsable output.
    #[error("provider error: {0}")]
    Provider(String),

    /// Malformed inbound request (empty question, bad payload shape).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown data source or job identifier.
    #[error("not found: {0}")]
    NotFound(String),
}

impl QueryError {
    /// Stable machine-readable error code, independent of the message text.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "connectivity_error",
            Self::SafetyViolation(_) => "safety_violation",
            Self::Execution(_) => "execution_error",
            Self::Timeout { .. } => "query_timeout",
            Self::Provider(_) => "provider_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
        }
    }

    /// Whether the self-healer may attempt a repair after this failure.
    ///
    /// Only execution-time failures qualify; timeouts additionally require
    /// the healed candidate to differ from the failing one, which the
    /// pipeline checks at the call site.
    #[must_use]
    pub fn is_healable(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Timeout { .. })
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SafetyViolation(_) => StatusCode::FORBIDDEN,
            Self::Execution(_) => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Provider(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// JSON body returned for every failure path.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code from [`QueryError::code`].
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Outcome of a connectivity probe.
///
/// Failures are reported in the value, never via `Err` - the connector
/// contract requires `test_connection` to not throw past this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    /// Whether the probe succeeded.
    pub ok: bool,
    /// Success confirmation or failure description.
    pub message: String,
    /// Queryable entity names discovered during the probe.
    pub tables: Vec<String>,
}

impl ConnectionTest {
    /// Successful probe with the discovered entity names.
    #[must_use]
    pub fn ok(message: impl Into<String>, tables: Vec<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            tables,
        }
    }

    /// Failed probe. Entity list is empty.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            tables: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(QueryError::Connectivity(String::new()).code(), "connectivity_error");
        assert_eq!(QueryError::SafetyViolation(String::new()).code(), "safety_violation");
        assert_eq!(QueryError::Execution(String::new()).code(), "execution_error");
        assert_eq!(QueryError::Timeout { seconds: 30 }.code(), "query_timeout");
        assert_eq!(QueryError::Provider(String::new()).code(), "provider_error");
    }

    #[test]
    fn safety_violation_is_distinct_from_execution() {
        let safety = QueryError::SafetyViolation("DROP detected".into());
        let exec = QueryError::Execution("relation missing".into());
        assert_ne!(safety.code(), exec.code());
        assert!(!safety.is_healable());
        assert!(exec.is_healable());
    }

    #[test]
    fn timeout_is_healable() {
        assert!(QueryError::Timeout { seconds: 30 }.is_healable());
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let err = QueryError::Timeout { seconds: 45 };
        assert!(err.to_string().contains("45 second"));
    }
}
