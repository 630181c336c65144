//! Asaas webhook event processing
//!
//! Webhooks are a hint, not the source of truth: read-time reconciliation
//! converges the same state even when events are lost. Only confirmed or
//! received payment events activate a plan; everything else adjusts ledger
//! status or subscription lifecycle.

use serde::Deserialize;
use uuid::Uuid;

use lexflow_shared::PaymentStatus;

use crate::catalog;
use crate::error::BillingResult;
use crate::gateway::{GatewayPayment, GatewaySubscription};
use crate::reconcile::ReconciliationEngine;
use crate::store::{PaymentLedger, SubscriptionStore};

/// Incoming Asaas webhook payload
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payment: Option<GatewayPayment>,
    #[serde(default)]
    pub subscription: Option<GatewaySubscription>,
}

/// Processes Asaas webhook events against the local store
#[derive(Clone)]
pub struct WebhookProcessor {
    engine: ReconciliationEngine,
    store: SubscriptionStore,
    ledger: PaymentLedger,
}

impl WebhookProcessor {
    pub fn new(
        engine: ReconciliationEngine,
        store: SubscriptionStore,
        ledger: PaymentLedger,
    ) -> Self {
        Self {
            engine,
            store,
            ledger,
        }
    }

    /// Handle one event. Errors are for the caller to log; the HTTP layer
    /// acknowledges 200 regardless to avoid gateway retry storms.
    pub async fn process(&self, event: WebhookEvent) -> BillingResult<()> {
        match event.event.as_str() {
            "PAYMENT_CONFIRMED" | "PAYMENT_RECEIVED" => {
                if let Some(payment) = event.payment {
                    self.handle_settled_payment(payment).await?;
                }
            }
            "PAYMENT_OVERDUE" => {
                if let Some(payment) = event.payment {
                    self.ledger
                        .set_status_by_external(&payment.id, PaymentStatus::Failed)
                        .await?;
                }
            }
            "PAYMENT_REFUNDED" | "PAYMENT_DELETED" => {
                if let Some(payment) = event.payment {
                    self.ledger
                        .set_status_by_external(&payment.id, PaymentStatus::Canceled)
                        .await?;
                }
            }
            "SUBSCRIPTION_DELETED" | "SUBSCRIPTION_INACTIVATED" => {
                if let Some(subscription) = event.subscription {
                    self.handle_subscription_ended(&subscription.id).await?;
                }
            }
            other => {
                tracing::debug!(event = %other, "ignoring unhandled webhook event");
            }
        }
        Ok(())
    }

    async fn handle_settled_payment(&self, payment: GatewayPayment) -> BillingResult<()> {
        let Some(org_id) = self.resolve_org(&payment).await? else {
            tracing::warn!(
                payment_id = %payment.id,
                "settled payment does not resolve to a known organization"
            );
            return Ok(());
        };

        // Prefer the structured intent over the description heuristic
        let pending_plan = self
            .ledger
            .latest_pending(org_id)
            .await?
            .and_then(|p| p.plan_id);
        let plan = match pending_plan {
            Some(p) => p,
            None => {
                let desc = payment.description.as_deref().unwrap_or("");
                let inferred = catalog::infer_plan_from_description(desc);
                tracing::warn!(
                    org_id = %org_id,
                    payment_id = %payment.id,
                    plan = %inferred,
                    "plan inferred from charge description"
                );
                inferred
            }
        };
        let amount_cents = catalog::price_cents(plan)
            .filter(|c| *c > 0)
            .unwrap_or_else(|| payment.amount_cents());

        self.engine
            .apply_confirmed_payment(org_id, &payment.id, plan, amount_cents)
            .await?;
        tracing::info!(org_id = %org_id, payment_id = %payment.id, plan = %plan, "payment settled via webhook");
        Ok(())
    }

    async fn handle_subscription_ended(&self, external_id: &str) -> BillingResult<()> {
        let Some(org_id) = self.store.org_for_external(external_id).await? else {
            tracing::warn!(subscription_id = %external_id, "lifecycle event for unknown subscription");
            return Ok(());
        };
        let mut tx = self.store.begin_org_tx(org_id).await?;
        self.store.mark_canceled(&mut tx, org_id).await?;
        tx.commit().await?;
        tracing::info!(org_id = %org_id, subscription_id = %external_id, "subscription ended via webhook");
        Ok(())
    }

    /// Payments carry our organization id as externalReference; fall back to
    /// the subscription link for charges created before that was stamped.
    async fn resolve_org(&self, payment: &GatewayPayment) -> BillingResult<Option<Uuid>> {
        if let Some(reference) = &payment.external_reference {
            if let Ok(org_id) = reference.parse::<Uuid>() {
                return Ok(Some(org_id));
            }
        }
        if let Some(subscription_id) = &payment.subscription {
            return self.store.org_for_external(subscription_id).await;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let raw = r#"{
            "event": "PAYMENT_CONFIRMED",
            "payment": {
                "id": "pay_1",
                "value": 99.0,
                "status": "CONFIRMED",
                "externalReference": "9a9e3a40-1111-2222-3333-444455556666",
                "subscription": "sub_1"
            }
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "PAYMENT_CONFIRMED");
        let payment = event.payment.unwrap();
        assert_eq!(payment.id, "pay_1");
        assert_eq!(payment.mapped_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_subscription_event_parsing() {
        let raw = r#"{
            "event": "SUBSCRIPTION_DELETED",
            "subscription": {"id": "sub_1", "customer": "cus_1", "value": 99.0}
        }"#;
        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.subscription.unwrap().id, "sub_1");
    }

    #[test]
    fn test_unknown_event_parses_without_payload() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"event": "PAYMENT_UPDATED"}"#).unwrap();
        assert!(event.payment.is_none());
        assert!(event.subscription.is_none());
    }
}
