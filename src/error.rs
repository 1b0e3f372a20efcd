use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::payments::QrError;
use crate::ports::RepositoryError;
use crate::use_cases::{CreateDepositError, ManualSettlementError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many requests: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment provider error: {0}")]
    Upstream(String),
}

impl AppError {
    pub(crate) fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::RateLimited(_) => AppError::RateLimited(
                "Too many deposit requests in the last hour, please try again later".to_string(),
            ),
            RepositoryError::Conflict(msg) => AppError::Internal(msg),
            RepositoryError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<QrError> for AppError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::InvalidConfiguration(msg) => AppError::Internal(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<CreateDepositError> for AppError {
    fn from(err: CreateDepositError) -> Self {
        match err {
            CreateDepositError::InvalidAmount(msg) => AppError::Validation(msg),
            CreateDepositError::RateLimited => AppError::RateLimited(err.to_string()),
            CreateDepositError::Qr(e) => e.into(),
            CreateDepositError::ReferenceExhausted => AppError::Internal(err.to_string()),
            CreateDepositError::Repository(e) => e.into(),
        }
    }
}

impl From<ManualSettlementError> for AppError {
    fn from(err: ManualSettlementError) -> Self {
        match err {
            ManualSettlementError::NotFound(id) => AppError::NotFound(format!("deposit {}", id)),
            ManualSettlementError::NotPending { .. } => AppError::Conflict(err.to_string()),
            ManualSettlementError::Repository(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Database details stay in the logs.
        let message = match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_rate_limited_status_code() {
        let error = AppError::RateLimited("slow down".to_string());
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unauthorized_error_status_code() {
        let error = AppError::Unauthorized("Unauthorized access".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_repository_rate_limit_maps_to_429() {
        let error = AppError::from(RepositoryError::RateLimited(7));
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_provider_failure_maps_to_bad_gateway() {
        let error = AppError::from(QrError::Timeout);
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_create_deposit_errors_map_to_http() {
        let invalid = AppError::from(CreateDepositError::InvalidAmount("too small".to_string()));
        assert_eq!(invalid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let limited = AppError::from(CreateDepositError::RateLimited);
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let error = AppError::Validation("amount must be at least 10000".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_database_error_response() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
