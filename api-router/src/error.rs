use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use common::error::AppError;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// API-facing error: a §7 taxonomy class plus the machine-readable code
/// and sanitized message the envelope carries.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                code: "VALIDATION_ERROR",
                details: Some(json!({ "reason": message.clone() })),
                message,
                retry_after_secs: None,
            },
            AppError::NotFound(message) => Self {
                status: StatusCode::NOT_FOUND,
                code: "NOT_FOUND",
                message,
                details: None,
                retry_after_secs: None,
            },
            AppError::Conflict(message) => {
                let code = if message.contains("content") {
                    "DUPLICATE_DOCUMENT_CONTENT"
                } else if message.contains("title") {
                    "DUPLICATE_DOCUMENT_TITLE"
                } else {
                    "CONFLICT"
                };
                Self {
                    status: StatusCode::CONFLICT,
                    code,
                    message,
                    details: None,
                    retry_after_secs: None,
                }
            }
            AppError::Auth(message) => Self {
                status: StatusCode::UNAUTHORIZED,
                code: "UNAUTHORIZED",
                message,
                details: None,
                retry_after_secs: None,
            },
            AppError::Forbidden(message) => Self {
                status: StatusCode::FORBIDDEN,
                code: "NOT_AUTHORIZED",
                message,
                details: None,
                retry_after_secs: None,
            },
            AppError::RateLimited { retry_after_secs } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "RATE_LIMITED",
                message: "too many requests".to_string(),
                details: None,
                retry_after_secs: Some(retry_after_secs),
            },
            AppError::QuotaExceeded(message) => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "QUOTA_EXCEEDED",
                message,
                details: None,
                retry_after_secs: Some(60),
            },
            AppError::ProviderTimeout(_) => Self {
                status: StatusCode::GATEWAY_TIMEOUT,
                code: "PROVIDER_TIMEOUT",
                message: "upstream provider timed out".to_string(),
                details: None,
                retry_after_secs: None,
            },
            AppError::ProviderUnavailable(_) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "PROVIDER_UNAVAILABLE",
                message: "no healthy provider available".to_string(),
                details: None,
                retry_after_secs: None,
            },
            AppError::ProviderError(_) => Self {
                status: StatusCode::BAD_GATEWAY,
                code: "PROVIDER_ERROR",
                message: "upstream provider returned an invalid response".to_string(),
                details: None,
                retry_after_secs: None,
            },
            other => {
                tracing::error!(error = %other, "internal error");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "INTERNAL_ERROR",
                    message: "internal server error".to_string(),
                    details: None,
                    retry_after_secs: None,
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
                timestamp: Utc::now().to_rfc3339(),
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_conflicts_carry_specific_codes() {
        let content = ApiError::from(AppError::Conflict("duplicate document content".into()));
        assert_eq!(content.status, StatusCode::CONFLICT);
        assert_eq!(content.code, "DUPLICATE_DOCUMENT_CONTENT");

        let title = ApiError::from(AppError::Conflict("duplicate document title".into()));
        assert_eq!(title.code, "DUPLICATE_DOCUMENT_TITLE");
    }

    #[test]
    fn rate_limits_map_to_429_with_retry_after() {
        let err = ApiError::from(AppError::RateLimited {
            retry_after_secs: 60,
        });
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after_secs, Some(60));

        let response = err.into_response();
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(|v| v.to_str().unwrap_or_default()),
            Some("60")
        );
    }

    #[test]
    fn auth_and_forbidden_map_to_distinct_statuses() {
        let unauthorized = ApiError::from(AppError::Auth("no valid session".into()));
        assert_eq!(unauthorized.status, StatusCode::UNAUTHORIZED);
        assert_eq!(unauthorized.code, "UNAUTHORIZED");

        let forbidden = ApiError::from(AppError::Forbidden("no grant for tool".into()));
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden.code, "NOT_AUTHORIZED");
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let err = ApiError::from(AppError::InternalError("db password leaked".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");
    }

    #[test]
    fn validation_errors_populate_details() {
        let err = ApiError::from(AppError::Validation("threshold 3 outside [0, 1]".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.details.is_some());
    }
}
