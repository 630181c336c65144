//! Periodic billing sweeps
//!
//! Reconciliation already repairs state at read time, so these jobs only
//! cover organizations nobody is looking at: lapsed paid plans are
//! reverted, and pending checkouts are pushed through the same
//! reconciliation the subscription view runs.

use time::OffsetDateTime;
use tracing::{error, info, warn};

use lexflow_billing::{ReconciliationEngine, SubscriptionStore};

/// Revert paid subscriptions whose paid period has lapsed
pub async fn sweep_lapsed_subscriptions(store: &SubscriptionStore) {
    let now = OffsetDateTime::now_utc();
    let org_ids = match store.lapsed_org_ids(now).await {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %e, "failed to query lapsed subscriptions");
            return;
        }
    };

    if org_ids.is_empty() {
        return;
    }

    info!(count = org_ids.len(), "reverting lapsed subscriptions");

    for org_id in org_ids {
        let mut tx = match store.begin_org_tx(org_id).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(org_id = %org_id, error = %e, "failed to lock organization for revert");
                continue;
            }
        };

        if let Err(e) = store.revert_to_free(&mut tx, org_id).await {
            error!(org_id = %org_id, error = %e, "failed to revert lapsed subscription");
            continue;
        }

        match tx.commit().await {
            Ok(_) => info!(org_id = %org_id, "lapsed subscription reverted to free"),
            Err(e) => error!(org_id = %org_id, error = %e, "failed to commit revert"),
        }
    }
}

/// Re-run reconciliation for organizations stuck with a pending checkout.
///
/// A checkout that was paid at the gateway but never confirmed locally
/// (missed webhook, crashed request) self-heals here instead of waiting
/// for the next dashboard visit.
pub async fn sweep_pending_checkouts(engine: &ReconciliationEngine, store: &SubscriptionStore) {
    let org_ids = match store.pending_linked_org_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            error!(error = %e, "failed to query pending checkouts");
            return;
        }
    };

    if org_ids.is_empty() {
        return;
    }

    info!(count = org_ids.len(), "reconciling pending checkouts");

    for org_id in org_ids {
        match engine.subscription_view(org_id).await {
            Ok(view) => {
                info!(
                    org_id = %org_id,
                    plan = %view.plan,
                    status = %view.status,
                    "pending checkout reconciled"
                );
            }
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "pending checkout reconciliation failed");
            }
        }
    }
}
