//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use lexflow_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),
    #[error("No organization found")]
    NoOrganization,

    // Billing errors
    #[error("A tax id (CPF/CNPJ) is required before checkout. Update the billing profile first.")]
    MissingDocument,
    #[error("Payment required")]
    PaymentRequired,
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("Payment gateway error: {0}")]
    Upstream(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::NoOrganization => (
                StatusCode::NOT_FOUND,
                "NO_ORGANIZATION",
                "No organization found for this user".to_string(),
            ),

            // Billing
            ApiError::MissingDocument => {
                (StatusCode::BAD_REQUEST, "MISSING_DOCUMENT", self.to_string())
            }
            ApiError::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_REQUIRED",
                self.to_string(),
            ),
            ApiError::MethodNotAllowed(msg) => {
                (StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", msg.clone())
            }
            // Message is for operators; gateway details carry no secrets
            ApiError::Upstream(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UPSTREAM_ERROR",
                msg.clone(),
            ),

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::MissingTaxId => ApiError::MissingDocument,
            BillingError::UnknownPlan(plan) => {
                ApiError::BadRequest(format!("Invalid plan: {}", plan))
            }
            BillingError::ContactSales => ApiError::BadRequest(
                "Enterprise plans are arranged through sales. Contact us to get set up."
                    .to_string(),
            ),
            BillingError::NoActiveSubscription(_) => {
                ApiError::BadRequest("No active subscription to cancel".to_string())
            }
            BillingError::NotFound(msg) => {
                tracing::warn!(detail = %msg, "billing resource not found");
                ApiError::NotFound
            }
            BillingError::GatewayApi(msg) => ApiError::Upstream(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(detail = %msg, "billing internal error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
