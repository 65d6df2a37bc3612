use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use std::fmt;

use crate::validation::FieldError;

/// Gateway-level failures. Everything at or below the orchestrator boundary
/// is recovered locally and turned into a business `VerificationResponse`;
/// the variants here cover the request stages before orchestration plus
/// faults in the gateway itself.
#[derive(Debug)]
pub enum VopError {
    Validation(Vec<FieldError>),
    Unauthorized(String),
    Forbidden(String),
    RateLimited { retry_after_secs: u64 },
    Database(sqlx::Error),
    Cache(redis::RedisError),
    Configuration(String),
    GatewayTimeout,
    Internal(String),
}

impl fmt::Display for VopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VopError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                write!(f, "Request validation failed: {}", fields.join(", "))
            }
            VopError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            VopError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            VopError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limit exceeded, retry after {}s", retry_after_secs)
            }
            VopError::Database(e) => write!(f, "Database error: {}", e),
            VopError::Cache(e) => write!(f, "Cache error: {}", e),
            VopError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            VopError::GatewayTimeout => write!(f, "Gateway timeout"),
            VopError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for VopError {}

impl From<sqlx::Error> for VopError {
    fn from(err: sqlx::Error) -> Self {
        VopError::Database(err)
    }
}

impl From<redis::RedisError> for VopError {
    fn from(err: redis::RedisError) -> Self {
        VopError::Cache(err)
    }
}

impl ResponseError for VopError {
    fn status_code(&self) -> StatusCode {
        match self {
            VopError::Validation(_) => StatusCode::BAD_REQUEST,
            VopError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            VopError::Forbidden(_) => StatusCode::FORBIDDEN,
            VopError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            VopError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            VopError::Database(_)
            | VopError::Cache(_)
            | VopError::Configuration(_)
            | VopError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let timestamp = Utc::now().to_rfc3339();

        match self {
            VopError::Validation(errors) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "validation_error",
                "message": "Request validation failed",
                "details": errors,
                "timestamp": timestamp,
            })),
            VopError::Unauthorized(msg) => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": msg,
                "timestamp": timestamp,
            })),
            VopError::Forbidden(msg) => HttpResponse::Forbidden().json(serde_json::json!({
                "error": "insufficient_scope",
                "message": msg,
                "timestamp": timestamp,
            })),
            VopError::RateLimited { retry_after_secs } => {
                HttpResponse::TooManyRequests().json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "message": "Rate limit exceeded",
                    "retryAfter": retry_after_secs,
                    "timestamp": timestamp,
                }))
            }
            VopError::GatewayTimeout => HttpResponse::GatewayTimeout().json(serde_json::json!({
                "error": "gateway_timeout",
                "message": "Request timeout",
                "timestamp": timestamp,
            })),
            // Internal faults never leak details to the caller.
            VopError::Database(_)
            | VopError::Cache(_)
            | VopError::Configuration(_)
            | VopError::Internal(_) => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_server_error",
                    "message": "An unexpected error occurred",
                    "timestamp": timestamp,
                }))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, VopError>;
