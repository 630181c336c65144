//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// JWT claims structure for Lexflow-issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Organization ID
    pub org_id: Uuid,
    /// User role
    pub role: String,
    /// Email
    pub email: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, access_token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry_hours,
        }
    }

    /// Generate an access token
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: &str,
        email: &str,
    ) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + Duration::hours(self.access_token_expiry_hours);

        let claims = Claims {
            sub: user_id,
            org_id,
            role: role.to_string(),
            email: email.to_string(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidToken => JwtError::Invalid,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => JwtError::Invalid,
                _ => JwtError::Validation(e.to_string()),
            })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_generation_and_validation() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();

        let token = jwt
            .generate_access_token(user_id, org_id, "owner", "test@example.com")
            .expect("Failed to generate token");

        let claims = jwt.validate_token(&token).expect("Invalid token");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.org_id, org_id);
        assert_eq!(claims.role, "owner");
        assert_eq!(claims.email, "test@example.com");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let jwt = JwtManager::new("test-secret-key-at-least-32-chars!", 24);
        let other = JwtManager::new("another-secret-key-at-least-32-ch!", 24);

        let token = jwt
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), "admin", "a@b.c")
            .expect("Failed to generate token");

        assert!(other.validate_token(&token).is_err());
    }
}
