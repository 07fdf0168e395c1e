//! Standardized API responses.

use analytics_core::{Error, RateLimitErrorCode, ValidationErrorCode};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use telemetry::{ComponentHealthReport, HealthStatus};
use uuid::Uuid;

use crate::services::CollectOutcome;

/// Response to a public tracking call.
///
/// `tracked: false` is a normal outcome (dropped write, empty search term);
/// the page action that triggered the call must never fail because of it.
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackResponse {
    pub tracked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub timestamp: i64,
}

impl TrackResponse {
    pub fn from_outcome(outcome: &CollectOutcome, timestamp: i64) -> Self {
        Self {
            tracked: outcome.tracked,
            session_id: outcome.session_id,
            timestamp,
        }
    }
}

/// `GET /health` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub store_connected: bool,
    pub auth_connected: bool,
    /// `mock` when admin tokens are accepted without calling the auth service.
    pub auth_mode: String,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
            retry_after: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(
            StatusCode::BAD_REQUEST,
            ValidationErrorCode::InvalidPayload.code(),
            msg,
        )
    }

    pub fn rate_limited(code: RateLimitErrorCode, retry_after: Option<u64>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            response: ErrorResponse::new("Rate limit exceeded", code.code()),
            retry_after,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
    }

    pub fn validation(code: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            response: ErrorResponse::new("Validation failed", code).with_details(errors),
            retry_after: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.response.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.response)).into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            Error::Auth { code, message, .. } | Error::Database { code, message, .. } => {
                ApiError::with_code(status, code, message)
            }
            Error::ValidationWithCode { code, message, .. } => ApiError::validation(code, vec![message]),
            Error::RateLimit {
                code,
                message,
                retry_after,
                ..
            } => ApiError {
                status,
                response: ErrorResponse::new(message, code),
                retry_after,
            },
            Error::Validation(msg) => {
                ApiError::validation(ValidationErrorCode::InvalidPayload.code(), vec![msg])
            }
            Error::InvalidEventType(event_type) => ApiError::validation(
                ValidationErrorCode::InvalidPayload.code(),
                vec![format!("Unrecognized event_type: {event_type}")],
            ),
            Error::Serialization(e) => {
                ApiError::validation(ValidationErrorCode::InvalidPayload.code(), vec![e.to_string()])
            }
            Error::Internal(msg) => ApiError::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::{AuthErrorCode, DbErrorCode};

    #[test]
    fn test_core_errors_keep_codes_and_status() {
        let err: ApiError = Error::auth(AuthErrorCode::MissingToken, "missing").into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "AUTH_001");

        let err: ApiError = Error::invalid_date_range("start after end").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALID_002");

        let err: ApiError = Error::InvalidEventType("page_flip".into()).into();
        assert_eq!(err.code(), "VALID_001");

        let err: ApiError = Error::database(DbErrorCode::Timeout, "slow").into();
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::rate_limited(RateLimitErrorCode::Exceeded, Some(7)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }
}
