//! Authentication module for Lexflow

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{require_auth, require_billing_admin, AuthUser};
