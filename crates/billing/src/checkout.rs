//! Checkout: self-serve subscription creation
//!
//! Plan guards run before any gateway or database call, so rejected checkouts
//! (unknown plan, enterprise, missing tax id) leave no partial state behind.
//! Checkout itself never activates a plan: it links the gateway subscription
//! and records a pending payment intent, and activation waits for a settled
//! charge (webhook or reconciliation).

use sqlx::PgPool;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use lexflow_shared::{Organization, Plan};

use crate::catalog;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{AsaasClient, BILLING_TYPE_PIX, BILLING_TYPE_UNDEFINED, CYCLE_MONTHLY};
use crate::store::{PaymentLedger, SubscriptionStore};

/// Asaas needs a moment to generate the first charge after a subscription is
/// created; the post-checkout invoice fetch waits this long.
const FIRST_CHARGE_DELAY: Duration = Duration::from_millis(1500);

/// What a checkout produced
#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// Free plan: nothing to charge, nothing created
    Free,
    Created {
        subscription_id: String,
        customer_id: String,
        amount_cents: i64,
        /// Local ledger row for the first charge
        payment_id: Uuid,
        /// First charge's hosted invoice, when the gateway had generated it in time
        invoice_url: Option<String>,
    },
}

/// Resolved charge parameters for a checkout
#[derive(Debug, Clone, PartialEq)]
struct ChargePlan {
    plan: Plan,
    amount_cents: i64,
    billing_type: &'static str,
    description: String,
}

/// Resolve and guard the checkout request. Returns None for the free plan
/// (informational no-op). Must stay free of I/O: this runs before anything
/// touches the gateway or the database.
fn plan_charge(plan_token: &str, has_coupon: bool) -> BillingResult<Option<ChargePlan>> {
    let plan = catalog::resolve(plan_token)?;
    if plan.is_contact_sales() {
        return Err(BillingError::ContactSales);
    }
    if plan == Plan::Free {
        return Ok(None);
    }
    let list_price = catalog::price_cents(plan)
        .ok_or_else(|| BillingError::Internal(format!("no price for plan {}", plan)))?;

    let charge = if has_coupon {
        ChargePlan {
            plan,
            amount_cents: catalog::PROMO_PRICE_CENTS,
            billing_type: BILLING_TYPE_PIX,
            description: catalog::promo_description(plan),
        }
    } else {
        ChargePlan {
            plan,
            amount_cents: list_price,
            billing_type: BILLING_TYPE_UNDEFINED,
            description: catalog::standard_description(plan),
        }
    };
    Ok(Some(charge))
}

/// Checkout service
#[derive(Clone)]
pub struct CheckoutService {
    gateway: AsaasClient,
    store: SubscriptionStore,
    ledger: PaymentLedger,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(
        gateway: AsaasClient,
        store: SubscriptionStore,
        ledger: PaymentLedger,
        pool: PgPool,
    ) -> Self {
        Self {
            gateway,
            store,
            ledger,
            pool,
        }
    }

    /// Initiate checkout for an organization.
    ///
    /// On success the subscription row carries only the gateway link (plan and
    /// status untouched) and the ledger holds a pending payment stamped with
    /// the target plan.
    pub async fn initiate(
        &self,
        org: &Organization,
        plan_token: &str,
        has_coupon: bool,
    ) -> BillingResult<CheckoutOutcome> {
        let Some(charge) = plan_charge(plan_token, has_coupon)? else {
            tracing::info!(org_id = %org.id, "free plan checkout, nothing to charge");
            return Ok(CheckoutOutcome::Free);
        };

        let customer_id = self.ensure_customer(org).await?;

        let today = OffsetDateTime::now_utc().date();
        let subscription = self
            .gateway
            .create_subscription(
                &customer_id,
                charge.billing_type,
                charge.amount_cents,
                today,
                CYCLE_MONTHLY,
                &charge.description,
                &org.id.to_string(),
            )
            .await?;

        tracing::info!(
            org_id = %org.id,
            subscription_id = %subscription.id,
            plan = %charge.plan,
            amount_cents = charge.amount_cents,
            has_coupon,
            "gateway subscription created"
        );

        self.store
            .link_gateway_subscription(org.id, &subscription.id)
            .await?;

        let pending = self
            .ledger
            .record_pending(
                org.id,
                charge.amount_cents,
                charge.billing_type,
                charge.plan,
                serde_json::json!({
                    "gateway_subscription_id": subscription.id,
                    "description": charge.description,
                }),
            )
            .await?;

        let invoice_url = self
            .fetch_first_charge(org.id, &subscription.id, pending.id)
            .await;

        Ok(CheckoutOutcome::Created {
            subscription_id: subscription.id,
            customer_id,
            amount_cents: charge.amount_cents,
            payment_id: pending.id,
            invoice_url,
        })
    }

    /// Reuse the stored gateway customer, or create one and persist its id
    async fn ensure_customer(&self, org: &Organization) -> BillingResult<String> {
        if let Some(id) = &org.asaas_customer_id {
            return Ok(id.clone());
        }
        let customer_id = self.gateway.find_or_create_customer(org).await?;
        sqlx::query(
            "UPDATE organizations SET asaas_customer_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(&customer_id)
        .bind(org.id)
        .execute(&self.pool)
        .await?;
        Ok(customer_id)
    }

    /// Best-effort: wait for the gateway to generate the first charge, then
    /// attach its id and invoice URL to the pending ledger row. Failure here
    /// never fails the checkout; reconciliation picks the charge up later.
    async fn fetch_first_charge(
        &self,
        org_id: Uuid,
        subscription_id: &str,
        payment_id: Uuid,
    ) -> Option<String> {
        tokio::time::sleep(FIRST_CHARGE_DELAY).await;

        let payments = match self.gateway.list_subscription_payments(subscription_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "first charge not available yet");
                return None;
            }
        };
        let first = payments.into_iter().next()?;
        let invoice_url = first.invoice_url.clone();

        if let Err(e) = self
            .ledger
            .attach_gateway_charge(payment_id, &first.id, invoice_url.as_deref())
            .await
        {
            tracing::warn!(
                org_id = %org_id,
                payment_id = %payment_id,
                error = %e,
                "failed to attach gateway charge to ledger"
            );
        }
        invoice_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Guards run before any I/O, so these tests prove free and enterprise
    // checkouts can never reach the gateway.

    #[test]
    fn test_free_plan_is_a_noop() {
        assert!(plan_charge("free", false).unwrap().is_none());
        assert!(plan_charge("FREE", true).unwrap().is_none());
    }

    #[test]
    fn test_enterprise_is_contact_sales() {
        assert!(matches!(
            plan_charge("enterprise", false),
            Err(BillingError::ContactSales)
        ));
        assert!(matches!(
            plan_charge("office", false),
            Err(BillingError::ContactSales)
        ));
    }

    #[test]
    fn test_unknown_plan_rejected() {
        assert!(matches!(
            plan_charge("platinum", false),
            Err(BillingError::UnknownPlan(_))
        ));
    }

    #[test]
    fn test_standard_charge_uses_list_price() {
        let charge = plan_charge("professional", false).unwrap().unwrap();
        assert_eq!(charge.plan, Plan::Professional);
        assert_eq!(charge.amount_cents, 29_900);
        assert_eq!(charge.billing_type, BILLING_TYPE_UNDEFINED);
        assert_eq!(
            charge.description,
            catalog::standard_description(Plan::Professional)
        );
    }

    #[test]
    fn test_coupon_forces_promo_price_and_pix() {
        let charge = plan_charge("basic", true).unwrap().unwrap();
        assert_eq!(charge.amount_cents, catalog::PROMO_PRICE_CENTS);
        assert_eq!(charge.billing_type, BILLING_TYPE_PIX);
        assert_eq!(charge.description, catalog::promo_description(Plan::Basic));
    }

    #[test]
    fn test_synonyms_resolve_before_charging() {
        let charge = plan_charge("pro", false).unwrap().unwrap();
        assert_eq!(charge.plan, Plan::Professional);
        let charge = plan_charge("starter", false).unwrap().unwrap();
        assert_eq!(charge.plan, Plan::Basic);
    }
}
