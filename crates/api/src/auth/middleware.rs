//! Authentication middleware and role checks

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use lexflow_shared::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, inserted as a request extension by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: UserRole,
    pub email: String,
}

/// The one role check for billing mutations: admins and owners only.
/// Both POST and DELETE on the subscription route go through here.
pub fn require_billing_admin(user: &AuthUser) -> Result<(), ApiError> {
    if user.role.can_administer() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Require a valid bearer token and attach the caller as an extension
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state
        .jwt
        .validate_token(token)
        .map_err(|_| ApiError::InvalidToken)?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        org_id: claims.org_id,
        role: UserRole::from_str_lossy(&claims.role),
        email: claims.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            role,
            email: "user@test.example".to_string(),
        }
    }

    #[test]
    fn test_billing_admin_predicate() {
        assert!(require_billing_admin(&user(UserRole::Owner)).is_ok());
        assert!(require_billing_admin(&user(UserRole::Admin)).is_ok());
        assert!(matches!(
            require_billing_admin(&user(UserRole::Member)),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            require_billing_admin(&user(UserRole::Viewer)),
            Err(ApiError::Forbidden)
        ));
    }
}
