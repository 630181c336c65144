//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Billing
    pub enable_billing: bool,
    /// Shared secret Asaas sends in the asaas-access-token webhook header
    pub asaas_webhook_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                // Signing key must be cryptographically strong
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Billing
            enable_billing: env::var("ENABLE_BILLING")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            asaas_webhook_token: env::var("ASAAS_WEBHOOK_TOKEN").ok(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
        env::remove_var("ENABLE_BILLING");
        env::remove_var("ASAAS_WEBHOOK_TOKEN");
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        cleanup_config();
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_weak_jwt_secret_rejected() {
        cleanup_config();
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("JWT_SECRET", "too-short");
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::WeakSecret(_))));
        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_defaults() {
        cleanup_config();
        setup_minimal_config();
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.jwt_expiry_hours, 24);
        assert!(config.enable_billing);
        assert!(config.asaas_webhook_token.is_none());
        cleanup_config();
    }
}
