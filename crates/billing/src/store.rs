//! Subscription store and payment ledger
//!
//! Exactly one subscription row per organization; every write is an upsert on
//! `organization_id`. Payment rows are append-only and never deleted.
//!
//! Mutations that participate in read-time reconciliation run inside a
//! transaction holding a per-organization advisory lock, so a cancellation and
//! a concurrent self-heal cannot interleave their check-then-write sequences.

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use lexflow_shared::{PaymentRecord, Plan, Subscription};

use crate::error::BillingResult;

/// Paid periods are monthly; a settled charge buys 30 days
const PERIOD_DAYS: i32 = 30;

/// Derive the advisory lock key for an organization from its UUID
fn org_lock_key(org_id: Uuid) -> i64 {
    let bytes = org_id.as_bytes();
    i64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Store for the one-row-per-organization subscriptions table
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Begin a transaction holding this organization's advisory lock.
    /// The lock is released automatically at commit or rollback.
    pub async fn begin_org_tx(&self, org_id: Uuid) -> BillingResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(org_lock_key(org_id))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// The organization's subscription row, if one exists.
    /// Absence means the organization has never checked out: callers present
    /// the free/active default themselves.
    pub async fn get(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, organization_id, plan, status, external_subscription_id,
                   amount_cents, current_period_start, current_period_end,
                   created_at, updated_at
            FROM subscriptions
            WHERE organization_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Record the gateway subscription id after checkout.
    ///
    /// Checkout never writes plan or status: a fresh row starts as
    /// free/pending, and an existing row keeps whatever plan and status it
    /// already has. Activation happens only once a payment settles.
    pub async fn link_gateway_subscription(
        &self,
        org_id: Uuid,
        external_subscription_id: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (organization_id, plan, status, external_subscription_id)
            VALUES ($1, 'free', 'pending', $2)
            ON CONFLICT (organization_id) DO UPDATE
            SET external_subscription_id = EXCLUDED.external_subscription_id,
                updated_at = NOW()
            "#,
        )
        .bind(org_id)
        .bind(external_subscription_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Activate a paid plan with a fresh 30-day period
    pub async fn activate(
        &self,
        conn: &mut PgConnection,
        org_id: Uuid,
        plan: Plan,
        amount_cents: i64,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (organization_id, plan, status, amount_cents,
                 current_period_start, current_period_end)
            VALUES ($1, $2, 'active', $3, NOW(), NOW() + make_interval(days => $4))
            ON CONFLICT (organization_id) DO UPDATE
            SET plan = EXCLUDED.plan,
                status = 'active',
                amount_cents = EXCLUDED.amount_cents,
                current_period_start = NOW(),
                current_period_end = NOW() + make_interval(days => $4),
                updated_at = NOW()
            "#,
        )
        .bind(org_id)
        .bind(plan)
        .bind(amount_cents)
        .bind(PERIOD_DAYS)
        .execute(conn)
        .await?;
        tracing::info!(org_id = %org_id, plan = %plan, amount_cents, "subscription activated");
        Ok(())
    }

    /// Revert a lapsed subscription to the free plan.
    ///
    /// The lapsed check is re-validated in the UPDATE itself: the decision to
    /// revert is made before the advisory lock is taken, and a payment
    /// confirmed in between renews `current_period_end`, which must win.
    pub async fn revert_to_free(&self, conn: &mut PgConnection, org_id: Uuid) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = 'free', status = 'active', amount_cents = 0,
                current_period_start = NULL, current_period_end = NULL,
                updated_at = NOW()
            WHERE organization_id = $1
              AND plan <> 'free'
              AND current_period_end < NOW()
            "#,
        )
        .bind(org_id)
        .execute(conn)
        .await?;
        if result.rows_affected() == 0 {
            tracing::info!(org_id = %org_id, "revert skipped, subscription no longer lapsed");
        } else {
            tracing::info!(org_id = %org_id, "subscription reverted to free");
        }
        Ok(())
    }

    /// Mark the subscription canceled. `current_period_end` is deliberately
    /// left in place: the organization keeps access until it lapses, and the
    /// expiry check reverts the row to free afterwards.
    pub async fn mark_canceled(&self, conn: &mut PgConnection, org_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', updated_at = NOW()
            WHERE organization_id = $1
            "#,
        )
        .bind(org_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Resolve the organization that owns a gateway subscription (webhooks)
    pub async fn org_for_external(&self, external_subscription_id: &str) -> BillingResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT organization_id FROM subscriptions WHERE external_subscription_id = $1",
        )
        .bind(external_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Organizations whose paid period has lapsed (worker sweep)
    pub async fn lapsed_org_ids(&self, now: OffsetDateTime) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT organization_id
            FROM subscriptions
            WHERE plan <> 'free'
              AND current_period_end IS NOT NULL
              AND current_period_end < $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Organizations with a gateway link and a pending payment (worker sweep)
    pub async fn pending_linked_org_ids(&self) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT s.organization_id
            FROM subscriptions s
            JOIN payments p ON p.organization_id = s.organization_id
            WHERE s.external_subscription_id IS NOT NULL
              AND p.status = 'pending'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Append-only local payment ledger
#[derive(Clone)]
pub struct PaymentLedger {
    pool: PgPool,
}

impl PaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the payment intent created at checkout; `plan` is the plan this
    /// payment will activate once settled.
    pub async fn record_pending(
        &self,
        org_id: Uuid,
        amount_cents: i64,
        method: &str,
        plan: Plan,
        metadata: serde_json::Value,
    ) -> BillingResult<PaymentRecord> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payments (organization_id, amount_cents, status, method, plan_id, metadata)
            VALUES ($1, $2, 'pending', $3, $4, $5)
            RETURNING id, organization_id, external_id, amount_cents, status, method,
                      plan_id, metadata, created_at, updated_at
            "#,
        )
        .bind(org_id)
        .bind(amount_cents)
        .bind(method)
        .bind(plan)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// The newest pending payment for an organization, i.e. the plan the user
    /// most recently tried to buy.
    pub async fn latest_pending(&self, org_id: Uuid) -> BillingResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, organization_id, external_id, amount_cents, status, method,
                   plan_id, metadata, created_at, updated_at
            FROM payments
            WHERE organization_id = $1 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Attach the gateway charge id (and invoice URL) discovered after checkout
    pub async fn attach_gateway_charge(
        &self,
        payment_id: Uuid,
        external_id: &str,
        invoice_url: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET external_id = $2,
                metadata = metadata || jsonb_build_object('invoice_url', $3::text),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(payment_id)
        .bind(external_id)
        .bind(invoice_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Settle the local row matching a gateway charge. Falls back to the
    /// newest pending row for the organization when the gateway id was never
    /// recorded locally (charge created before the post-checkout fetch ran).
    pub async fn mark_paid(
        &self,
        conn: &mut PgConnection,
        org_id: Uuid,
        external_id: &str,
    ) -> BillingResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'paid', updated_at = NOW()
            WHERE organization_id = $1 AND external_id = $2
            "#,
        )
        .bind(org_id)
        .bind(external_id)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                UPDATE payments
                SET status = 'paid', external_id = $2, updated_at = NOW()
                WHERE id = (
                    SELECT id FROM payments
                    WHERE organization_id = $1 AND status = 'pending'
                    ORDER BY created_at DESC
                    LIMIT 1
                )
                "#,
            )
            .bind(org_id)
            .bind(external_id)
            .execute(conn)
            .await?;
        }
        Ok(())
    }

    /// Update the status of the ledger row matching a gateway charge
    pub async fn set_status_by_external(
        &self,
        external_id: &str,
        status: lexflow_shared::PaymentStatus,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE external_id = $1")
            .bind(external_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recent ledger rows, newest first (local invoice fallback)
    pub async fn recent(&self, org_id: Uuid, limit: i64) -> BillingResult<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, organization_id, external_id, amount_cents, status, method,
                   plan_id, metadata, created_at, updated_at
            FROM payments
            WHERE organization_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_org_lock_key_is_stable() {
        let id = Uuid::new_v4();
        assert_eq!(org_lock_key(id), org_lock_key(id));
    }

    #[test]
    fn test_org_lock_key_differs_between_orgs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // Not a guarantee in general, but a collision here would be a bad day
        assert_ne!(org_lock_key(a), org_lock_key(b));
    }
}
