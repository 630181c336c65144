//! Asaas webhook receiver
//!
//! The gateway retries on non-2xx, so this endpoint always answers 200:
//! processing failures are logged and picked up later by reconciliation.

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::json;

use lexflow_billing::WebhookEvent;

use crate::state::AppState;

/// POST /webhooks/asaas
pub async fn asaas_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Json<serde_json::Value> {
    if let Some(expected) = &state.config.asaas_webhook_token {
        let presented = headers
            .get("asaas-access-token")
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            tracing::warn!("webhook token mismatch, ignoring event");
            return Json(json!({ "received": true }));
        }
    }

    let event: WebhookEvent = match serde_json::from_str(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable webhook payload, ignoring");
            return Json(json!({ "received": true }));
        }
    };

    let Some(billing) = &state.billing else {
        tracing::warn!(event = %event.event, "webhook received but billing is not configured");
        return Json(json!({ "received": true }));
    };

    if let Err(e) = billing.webhooks.process(event).await {
        tracing::error!(error = %e, "webhook processing failed");
    }

    Json(json!({ "received": true }))
}
