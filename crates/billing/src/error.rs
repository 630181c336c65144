//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Asaas API error: {0}")]
    GatewayApi(String),

    #[error("Invalid plan: {0}")]
    UnknownPlan(String),

    #[error("Enterprise plans are arranged through sales, not self-serve checkout")]
    ContactSales,

    #[error("A tax id (CPF/CNPJ) is required before checkout. Update the billing profile first.")]
    MissingTaxId,

    #[error("No active paid subscription for organization: {0}")]
    NoActiveSubscription(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::GatewayApi(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
