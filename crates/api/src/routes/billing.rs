//! Billing routes: checkout, subscription view, plan changes, cancellation

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use lexflow_billing::{catalog, CheckoutOutcome};
use lexflow_shared::{Organization, Plan};

use crate::auth::{require_billing_admin, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, BillingState};

fn billing_state(state: &AppState) -> ApiResult<&Arc<BillingState>> {
    state.billing.as_ref().ok_or_else(|| {
        tracing::error!("billing route hit but billing is not configured");
        ApiError::Upstream("Billing is not configured".to_string())
    })
}

async fn load_org(state: &AppState, org_id: Uuid) -> ApiResult<Organization> {
    sqlx::query_as::<_, Organization>(
        r#"
        SELECT id, name, legal_name, tax_id, email, phone, address_line1,
               city, region, postal_code, asaas_customer_id, created_at, updated_at
        FROM organizations
        WHERE id = $1
        "#,
    )
    .bind(org_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NoOrganization)
}

fn rfc3339(ts: Option<time::OffsetDateTime>) -> Option<String> {
    ts.and_then(|t| t.format(&Rfc3339).ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan: String,
    #[serde(default)]
    pub has_coupon: bool,
    /// Older clients send the coupon code itself instead of the flag
    #[serde(default)]
    pub coupon: Option<String>,
}

impl CheckoutRequest {
    fn wants_promo(&self) -> bool {
        self.has_coupon || self.coupon.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// POST /checkout
///
/// Starts a gateway subscription for a paid plan. Free plans are a no-op
/// and enterprise is steered to sales before any gateway call.
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CheckoutRequest>,
) -> ApiResult<Response> {
    let billing = billing_state(&state)?;
    let org = load_org(&state, user.org_id).await?;

    let outcome = billing
        .checkout
        .initiate(&org, &body.plan, body.wants_promo())
        .await?;

    match outcome {
        CheckoutOutcome::Free => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "plan": "free",
                "message": "Free plan does not require checkout",
            })),
        )
            .into_response()),
        CheckoutOutcome::Created {
            subscription_id,
            customer_id,
            amount_cents,
            payment_id,
            invoice_url,
        } => Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "subscriptionId": subscription_id,
                "customerId": customer_id,
                "status": "pending",
                "paymentId": payment_id,
                "amount": amount_cents,
                "invoiceUrl": invoice_url,
            })),
        )
            .into_response()),
    }
}

/// GET /subscription
///
/// The reconciled billing view: local row cross-checked against the
/// gateway, with invoices and the org's billing profile.
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = billing_state(&state)?;
    let org = load_org(&state, user.org_id).await?;

    let view = billing.engine.subscription_view(org.id).await?;

    Ok(Json(json!({
        "subscription": {
            "plan": view.plan,
            "status": view.status,
            "amount": view.amount_cents,
            "role": user.role,
            "pending_plan": view.pending_plan,
            "current_period_end": rfc3339(view.current_period_end),
        },
        "invoices": view.invoices,
        "billing": {
            "legal_name": org.legal_name,
            "tax_id": org.tax_id,
            "email": org.email,
            "address_line1": org.address_line1,
            "city": org.city,
            "region": org.region,
            "postal_code": org.postal_code,
        },
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan: String,
}

/// POST /subscription
///
/// Plan changes always go through a fresh checkout, so this endpoint only
/// steers the caller: free means cancel (DELETE), anything else means pay.
pub async fn update_subscription(
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Response> {
    require_billing_admin(&user)?;

    let plan = catalog::resolve(&body.plan)?;
    if plan == Plan::Free {
        return Err(ApiError::MethodNotAllowed(
            "Use DELETE /subscription to downgrade to the free plan".to_string(),
        ));
    }

    Err(ApiError::PaymentRequired)
}

/// DELETE /subscription
///
/// Cancels the gateway subscription and marks the local row canceled.
/// Access continues until the end of the already-paid period.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    require_billing_admin(&user)?;
    let billing = billing_state(&state)?;

    let outcome = billing.subscriptions.cancel(user.org_id).await?;

    Ok(Json(json!({
        "ok": true,
        "message": format!(
            "Subscription to the {} plan canceled. Access continues until the end of the paid period.",
            outcome.plan
        ),
        "validUntil": rfc3339(outcome.valid_until),
    })))
}
