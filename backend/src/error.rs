//! Application error handling
//!
//! This module provides unified error handling for the API,
//! converting internal errors to appropriate HTTP responses.
//!
//! Authentication failures never say which check failed: a wrong secret, an
//! unknown handle and a disabled identity all render the same body, and so
//! do every kind of bad token.

use crate::auth::HashError;
use crate::db::{ConnectionFault, DbError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use credence_shared::AuthError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// API error type that can be converted to HTTP responses
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Login failed, for whatever reason
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Missing, malformed, expired, forged or revoked token
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Hashing workers are saturated
    #[error("Service busy")]
    Busy,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail
#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::Unauthenticated
    }
}

impl From<HashError> for ApiError {
    fn from(err: HashError) -> Self {
        match err {
            HashError::Timeout => ApiError::Busy,
            HashError::Failed(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl ConnectionFault for ApiError {
    fn poisons_connection(&self) -> bool {
        matches!(self, ApiError::Database(err) if err.poisons_connection())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid handle or secret".to_string(),
            ),
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Authentication required".to_string(),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                "AUTH_BUSY",
                "Authentication is temporarily overloaded, retry shortly".to_string(),
            ),
            ApiError::Internal(err) => {
                error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Database(err) => database_response(err),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

fn database_response(err: &DbError) -> (StatusCode, &'static str, String) {
    match err {
        DbError::PoolExhausted => {
            warn!("Request rejected, connection pool exhausted");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "POOL_EXHAUSTED",
                "Server is at capacity, retry shortly".to_string(),
            )
        }
        DbError::Connectivity(source) => {
            error!("Database unreachable: {:?}", source);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_UNAVAILABLE",
                "Database is unavailable".to_string(),
            )
        }
        DbError::ConstraintViolation(_) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            "Resource already exists".to_string(),
        ),
        DbError::NotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        DbError::Query(source) => {
            error!("Database error: {:?}", source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            )
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status() {
        let error = ApiError::Validation("Invalid input".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status() {
        let error = ApiError::NotFound("Identity not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_every_token_failure_is_unauthenticated() {
        for reason in [
            AuthError::InvalidSignature,
            AuthError::Expired,
            AuthError::Malformed,
            AuthError::MissingToken,
            AuthError::Revoked,
        ] {
            let response = ApiError::from(reason).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_invalid_credentials_status() {
        let response = ApiError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_hash_timeout_is_busy() {
        let response = ApiError::from(HashError::Timeout).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_database_error_statuses() {
        let cases = [
            (DbError::PoolExhausted, StatusCode::SERVICE_UNAVAILABLE),
            (
                DbError::Connectivity(sqlx::Error::PoolClosed),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DbError::ConstraintViolation("identities_handle_key".to_string()),
                StatusCode::CONFLICT,
            ),
            (DbError::NotFound, StatusCode::NOT_FOUND),
            (
                DbError::Query(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_only_connectivity_poisons_connection() {
        assert!(ApiError::Database(DbError::Connectivity(sqlx::Error::PoolClosed)).poisons_connection());
        assert!(!ApiError::Database(DbError::PoolExhausted).poisons_connection());
        assert!(!ApiError::InvalidCredentials.poisons_connection());
    }
}
