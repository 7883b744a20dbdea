use axum::{
    Json,
    http::{StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::responses::RequestMeta;

pub const E_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const E_FORBIDDEN: &str = "FORBIDDEN";
pub const E_BAD_REQUEST: &str = "BAD_REQUEST";
pub const E_BELOW_MINIMUM: &str = "BELOW_MINIMUM";
pub const E_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_ALREADY_USED: &str = "ALREADY_USED";
pub const E_EXPIRED: &str = "EXPIRED";
pub const E_CONFLICT: &str = "CONFLICT";
pub const E_RATE_LIMITED: &str = "RATE_LIMITED";
pub const E_DB_FAILURE: &str = "DB_FAILURE";
pub const E_INTERNAL: &str = "INTERNAL";

/// Error taxonomy for ledger, issuer, pipeline and analytics operations.
///
/// Internal detail (store errors, stack traces) is logged server-side and
/// never serialized into the response body.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    BelowMinimum(String),
    InsufficientBalance(String),
    NotFound(String),
    AlreadyUsed(String),
    Expired(String),
    Conflict(String),
    RateLimited { retry_after_secs: u64 },
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    /// Stable machine-readable code for the variant.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => E_UNAUTHORIZED,
            ApiError::Forbidden(_) => E_FORBIDDEN,
            ApiError::BadRequest(_) => E_BAD_REQUEST,
            ApiError::BelowMinimum(_) => E_BELOW_MINIMUM,
            ApiError::InsufficientBalance(_) => E_INSUFFICIENT_BALANCE,
            ApiError::NotFound(_) => E_NOT_FOUND,
            ApiError::AlreadyUsed(_) => E_ALREADY_USED,
            ApiError::Expired(_) => E_EXPIRED,
            ApiError::Conflict(_) => E_CONFLICT,
            ApiError::RateLimited { .. } => E_RATE_LIMITED,
            ApiError::Internal(_) => E_INTERNAL,
        }
    }

    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        let code = Some(self.code().to_string());
        ApiErrorWithMeta {
            error: self,
            meta,
            code,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let mut retry_after: Option<u64> = None;
        let (status, error_message) = match self.error {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BelowMinimum(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InsufficientBalance(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::AlreadyUsed(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Expired(msg) => (StatusCode::GONE, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::RateLimited { retry_after_secs } => {
                retry_after = Some(retry_after_secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "too many requests".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}
