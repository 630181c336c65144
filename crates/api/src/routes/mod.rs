//! API routes

pub mod billing;
pub mod health;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Gateway webhooks are public; the handler checks the shared token itself
    let public_api_routes = Router::new().route("/webhooks/asaas", post(webhooks::asaas_webhook));

    // Protected API routes (auth required)
    let protected_api_routes = Router::new()
        .route("/checkout", post(billing::create_checkout))
        .route("/subscription", get(billing::get_subscription))
        .route("/subscription", post(billing::update_subscription))
        .route("/subscription", delete(billing::cancel_subscription))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}
