//! Subscription lifecycle: cancellation
//!
//! Cancellation keeps `current_period_end`: the organization already paid for
//! that window and keeps access until it lapses, at which point the read-time
//! expiry check reverts the row to free.

use time::OffsetDateTime;
use uuid::Uuid;

use lexflow_shared::{Plan, Subscription};

use crate::error::{BillingError, BillingResult};
use crate::gateway::AsaasClient;
use crate::store::SubscriptionStore;

/// Result of a cancellation
#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    pub plan: Plan,
    /// Access remains until this moment (the already-paid period)
    pub valid_until: Option<OffsetDateTime>,
}

/// Cancellation requires a paid (or at least non-free) subscription row
fn ensure_cancellable(sub: Option<Subscription>, org_id: Uuid) -> BillingResult<Subscription> {
    match sub {
        Some(s) if s.plan != Plan::Free => Ok(s),
        _ => Err(BillingError::NoActiveSubscription(org_id.to_string())),
    }
}

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService {
    gateway: AsaasClient,
    store: SubscriptionStore,
}

impl SubscriptionService {
    pub fn new(gateway: AsaasClient, store: SubscriptionStore) -> Self {
        Self { gateway, store }
    }

    /// Cancel the organization's subscription.
    ///
    /// The gateway delete is best-effort: a 404 is success (already gone), and
    /// any other gateway failure is logged while the local cancel proceeds, so
    /// the user is never told their cancellation failed because of gateway
    /// downtime. Runs under the org lock so a concurrent self-heal cannot
    /// re-activate mid-cancel.
    pub async fn cancel(&self, org_id: Uuid) -> BillingResult<CancellationOutcome> {
        let mut tx = self.store.begin_org_tx(org_id).await?;

        let sub = ensure_cancellable(self.store.get(org_id).await?, org_id)?;

        if let Some(external_id) = &sub.external_subscription_id {
            if let Err(e) = self.gateway.delete_subscription(external_id).await {
                tracing::warn!(
                    org_id = %org_id,
                    subscription_id = %external_id,
                    error = %e,
                    "gateway cancellation failed, proceeding with local cancel"
                );
            }
        }

        self.store.mark_canceled(&mut tx, org_id).await?;
        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            plan = %sub.plan,
            valid_until = ?sub.current_period_end,
            "subscription canceled"
        );

        Ok(CancellationOutcome {
            plan: sub.plan,
            valid_until: sub.current_period_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexflow_shared::SubscriptionStatus;

    fn sub(plan: Plan) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            plan,
            status: SubscriptionStatus::Active,
            external_subscription_id: Some("sub_1".to_string()),
            amount_cents: 9_900,
            current_period_start: Some(now),
            current_period_end: Some(now + time::Duration::days(30)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_free_plan_cannot_be_canceled() {
        let org_id = Uuid::new_v4();
        assert!(matches!(
            ensure_cancellable(Some(sub(Plan::Free)), org_id),
            Err(BillingError::NoActiveSubscription(_))
        ));
        assert!(matches!(
            ensure_cancellable(None, org_id),
            Err(BillingError::NoActiveSubscription(_))
        ));
    }

    #[test]
    fn test_paid_plan_is_cancellable() {
        let org_id = Uuid::new_v4();
        let s = ensure_cancellable(Some(sub(Plan::Basic)), org_id).unwrap();
        assert_eq!(s.plan, Plan::Basic);
        // The already-paid window survives cancellation
        assert!(s.current_period_end.is_some());
    }
}
