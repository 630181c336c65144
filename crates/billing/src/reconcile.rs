//! Read-time reconciliation of local billing state with the gateway ledger
//!
//! Every subscription read runs this engine. The decision logic is a pure
//! function over already-fetched data ([`reconcile`]), so the invariants are
//! testable without a database or a gateway; [`ReconciliationEngine`]
//! orchestrates the I/O around it.
//!
//! Failure semantics: gateway errors degrade the view to the local ledger and
//! never fail the read. Persistence failures of corrections are logged and the
//! corrected in-memory view is still returned.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use lexflow_shared::{PaymentRecord, PaymentStatus, Plan, Subscription, SubscriptionStatus};

use crate::catalog;
use crate::error::BillingResult;
use crate::gateway::{AsaasClient, GatewayPayment};
use crate::store::{PaymentLedger, SubscriptionStore};

/// The reconciled billing state returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct BillingView {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub amount_cents: i64,
    /// Plan of the newest unsettled payment intent, if any
    pub pending_plan: Option<Plan>,
    pub current_period_end: Option<OffsetDateTime>,
    pub invoices: Vec<InvoiceEntry>,
}

/// Provider-neutral invoice line
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceEntry {
    pub id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    /// Payment method (gateway billing type, e.g. PIX or UNDEFINED)
    pub method: Option<String>,
    pub due_date: Option<String>,
    pub description: Option<String>,
    pub invoice_url: Option<String>,
    pub bank_slip_url: Option<String>,
    pub receipt_url: Option<String>,
}

impl From<&GatewayPayment> for InvoiceEntry {
    fn from(p: &GatewayPayment) -> Self {
        Self {
            id: p.id.clone(),
            amount_cents: p.amount_cents(),
            status: p.mapped_status(),
            method: p.billing_type.clone(),
            due_date: p.due_date.clone(),
            description: p.description.clone(),
            invoice_url: p.invoice_url.clone(),
            bank_slip_url: p.bank_slip_url.clone(),
            receipt_url: p.transaction_receipt_url.clone(),
        }
    }
}

impl From<&PaymentRecord> for InvoiceEntry {
    fn from(p: &PaymentRecord) -> Self {
        Self {
            id: p
                .external_id
                .clone()
                .unwrap_or_else(|| p.id.to_string()),
            amount_cents: p.amount_cents,
            status: p.status,
            method: Some(p.method.clone()),
            due_date: None,
            description: None,
            invoice_url: p
                .metadata
                .get("invoice_url")
                .and_then(|v| v.as_str())
                .map(String::from),
            bank_slip_url: None,
            receipt_url: None,
        }
    }
}

/// A persisted state change the pure layer decided on
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Paid period lapsed: back to free/active/0
    RevertToFree,
    /// A settled gateway payment proves the plan should be active
    Activate {
        plan: Plan,
        amount_cents: i64,
        /// Gateway payment id to settle in the local ledger
        settle_external_id: String,
        /// True when the plan came from the description heuristic rather than
        /// a structured reference
        inferred: bool,
    },
}

/// Result of the pure reconciliation pass
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub amount_cents: i64,
    pub pending_plan: Option<Plan>,
    pub current_period_end: Option<OffsetDateTime>,
    pub corrections: Vec<Correction>,
}

/// Keep only payments that belong to this organization: stamped with our
/// organization id, or generated by the subscription we created for it.
pub fn filter_org_payments<'a>(
    payments: &'a [GatewayPayment],
    org_id: Uuid,
    external_subscription_id: Option<&str>,
) -> Vec<&'a GatewayPayment> {
    let org = org_id.to_string();
    payments
        .iter()
        .filter(|p| !p.deleted)
        .filter(|p| {
            p.external_reference.as_deref() == Some(org.as_str())
                || (external_subscription_id.is_some()
                    && p.subscription.as_deref() == external_subscription_id)
        })
        .collect()
}

/// Pure decision core. `gateway_payments` must already be filtered to this
/// organization; `None` means the gateway was unreachable.
pub fn reconcile(
    local: Option<&Subscription>,
    pending_plan: Option<Plan>,
    gateway_payments: Option<&[&GatewayPayment]>,
    now: OffsetDateTime,
) -> Reconciled {
    let mut corrections = Vec::new();

    // Expiry check first. A lapsed paid period reverts to the free default
    // before anything else is considered.
    let (mut plan, mut status, mut amount_cents, mut period_end) = match local {
        Some(sub) if sub.is_expired_at(now) => {
            corrections.push(Correction::RevertToFree);
            (Plan::Free, SubscriptionStatus::Active, 0, None)
        }
        Some(sub) => (
            sub.plan,
            sub.status,
            sub.amount_cents,
            sub.current_period_end,
        ),
        // No row yet: every organization is implicitly on the free plan
        None => (Plan::Free, SubscriptionStatus::Active, 0, None),
    };

    // Self-heal: a settled gateway payment outranks whatever the local row
    // says, unless the row is already consistently active on a paid plan that
    // matches the pending intent.
    let mut healed = false;
    if let Some(payments) = gateway_payments {
        let paid = payments.iter().find(|p| p.mapped_status().is_paid());
        if let Some(payment) = paid {
            let consistent = status == SubscriptionStatus::Active
                && plan.is_paid()
                && pending_plan.is_none_or(|p| p == plan);
            if !consistent {
                let (target, inferred) = match pending_plan {
                    Some(p) => (p, false),
                    None => {
                        let desc = payment.description.as_deref().unwrap_or("");
                        (catalog::infer_plan_from_description(desc), true)
                    }
                };
                let target_amount = catalog::price_cents(target)
                    .filter(|c| *c > 0)
                    .unwrap_or_else(|| payment.amount_cents());
                corrections.push(Correction::Activate {
                    plan: target,
                    amount_cents: target_amount,
                    settle_external_id: payment.id.clone(),
                    inferred,
                });
                plan = target;
                status = SubscriptionStatus::Active;
                amount_cents = target_amount;
                period_end = None; // persisted activation sets the real window
                healed = true;
            }
        }
    }

    // Display-amount backfill, response only
    if plan.is_paid() && amount_cents == 0 {
        if let Some(price) = catalog::price_cents(plan) {
            amount_cents = price;
        }
    }

    Reconciled {
        plan,
        status,
        amount_cents,
        // A heal settles the pending intent
        pending_plan: if healed { None } else { pending_plan },
        current_period_end: period_end,
        corrections,
    }
}

/// Orchestrates reconciliation I/O around the pure core
#[derive(Clone)]
pub struct ReconciliationEngine {
    gateway: AsaasClient,
    store: SubscriptionStore,
    ledger: PaymentLedger,
}

impl ReconciliationEngine {
    pub fn new(gateway: AsaasClient, store: SubscriptionStore, ledger: PaymentLedger) -> Self {
        Self {
            gateway,
            store,
            ledger,
        }
    }

    /// The reconciled billing view for an organization. Runs on every status
    /// read; self-heals local state as a side effect when the gateway ledger
    /// disagrees with it.
    pub async fn subscription_view(&self, org_id: Uuid) -> BillingResult<BillingView> {
        let local = self.store.get(org_id).await?;
        let pending = self.ledger.latest_pending(org_id).await?;
        let pending_plan = pending.as_ref().and_then(|p| p.plan_id);

        // Gateway cross-check only applies once a checkout has linked a
        // gateway subscription. Errors degrade to the local cache.
        let external_id = local
            .as_ref()
            .and_then(|s| s.external_subscription_id.clone());
        let gateway_payments = match &external_id {
            Some(ext) => match self.fetch_gateway_payments(org_id, ext).await {
                Ok(payments) => Some(payments),
                Err(e) => {
                    tracing::warn!(org_id = %org_id, error = %e, "gateway unavailable, serving local billing state");
                    None
                }
            },
            None => None,
        };

        let filtered = gateway_payments
            .as_deref()
            .map(|p| filter_org_payments(p, org_id, external_id.as_deref()));

        let now = OffsetDateTime::now_utc();
        let reconciled = reconcile(local.as_ref(), pending_plan, filtered.as_deref(), now);

        for correction in &reconciled.corrections {
            if let Correction::Activate { plan, inferred, .. } = correction {
                if *inferred {
                    tracing::warn!(
                        org_id = %org_id,
                        plan = %plan,
                        "activating plan inferred from charge description; no structured plan reference found"
                    );
                }
            }
        }

        // Persist corrections under the org lock. If this fails the caller
        // still gets the corrected in-memory view; the next read retries.
        let mut period_end = reconciled.current_period_end;
        if !reconciled.corrections.is_empty() {
            match self.apply_corrections(org_id, &reconciled.corrections).await {
                Ok(persisted_end) => {
                    if let Some(end) = persisted_end {
                        period_end = Some(end);
                    }
                }
                Err(e) => {
                    tracing::error!(org_id = %org_id, error = %e, "failed to persist reconciliation corrections");
                }
            }
        }

        let invoices = match &filtered {
            Some(payments) => payments.iter().map(|p| InvoiceEntry::from(*p)).collect(),
            None => self
                .ledger
                .recent(org_id, 20)
                .await?
                .iter()
                .map(InvoiceEntry::from)
                .collect(),
        };

        Ok(BillingView {
            plan: reconciled.plan,
            status: reconciled.status,
            amount_cents: reconciled.amount_cents,
            pending_plan: reconciled.pending_plan,
            current_period_end: period_end,
            invoices,
        })
    }

    async fn fetch_gateway_payments(
        &self,
        org_id: Uuid,
        external_subscription_id: &str,
    ) -> BillingResult<Vec<GatewayPayment>> {
        let subscription = self.gateway.get_subscription(external_subscription_id).await?;
        tracing::debug!(
            org_id = %org_id,
            subscription_id = %subscription.id,
            customer = %subscription.customer,
            "cross-checking gateway payments"
        );
        self.gateway
            .list_customer_payments(&subscription.customer)
            .await
    }

    async fn apply_corrections(
        &self,
        org_id: Uuid,
        corrections: &[Correction],
    ) -> BillingResult<Option<OffsetDateTime>> {
        let mut tx = self.store.begin_org_tx(org_id).await?;
        let mut activated = false;
        for correction in corrections {
            match correction {
                Correction::RevertToFree => {
                    self.store.revert_to_free(&mut tx, org_id).await?;
                }
                Correction::Activate {
                    plan,
                    amount_cents,
                    settle_external_id,
                    ..
                } => {
                    self.store
                        .activate(&mut tx, org_id, *plan, *amount_cents)
                        .await?;
                    self.ledger
                        .mark_paid(&mut tx, org_id, settle_external_id)
                        .await?;
                    activated = true;
                }
            }
        }
        tx.commit().await?;
        if activated {
            // Report the period the activation just persisted
            Ok(self
                .store
                .get(org_id)
                .await?
                .and_then(|s| s.current_period_end))
        } else {
            Ok(None)
        }
    }

    /// Settle a confirmed gateway payment and activate its plan (webhook path)
    pub async fn apply_confirmed_payment(
        &self,
        org_id: Uuid,
        external_payment_id: &str,
        plan: Plan,
        amount_cents: i64,
    ) -> BillingResult<()> {
        let mut tx = self.store.begin_org_tx(org_id).await?;
        self.ledger
            .mark_paid(&mut tx, org_id, external_payment_id)
            .await?;
        self.store.activate(&mut tx, org_id, plan, amount_cents).await?;
        tx.commit().await?;
        Ok(())
    }
}
