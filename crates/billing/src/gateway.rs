//! Asaas payment gateway client
//!
//! Thin reqwest wrapper over the Asaas REST API. Amounts cross this boundary
//! exactly once: the rest of the system works in integer cents, Asaas speaks
//! decimal reais. No automatic retries; callers decide how to degrade.

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use lexflow_shared::{Organization, PaymentStatus};

use crate::error::{BillingError, BillingResult};

/// Billing type for charges created without a chosen payment method
pub const BILLING_TYPE_UNDEFINED: &str = "UNDEFINED";
/// Billing type forced on promotional (coupon) checkouts
pub const BILLING_TYPE_PIX: &str = "PIX";
/// Subscription billing cycle
pub const CYCLE_MONTHLY: &str = "MONTHLY";

/// Asaas configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AsaasConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AsaasConfig {
    pub fn from_env() -> BillingResult<Self> {
        let api_key = std::env::var("ASAAS_API_KEY")
            .map_err(|_| BillingError::Config("ASAAS_API_KEY not set".to_string()))?;
        let base_url = std::env::var("ASAAS_BASE_URL")
            .unwrap_or_else(|_| "https://api.asaas.com/v3".to_string());
        Ok(Self { api_key, base_url })
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCustomer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySubscription {
    pub id: String,
    pub customer: String,
    pub value: f64,
    #[serde(default)]
    pub billing_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cycle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub next_due_date: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPayment {
    pub id: String,
    pub value: f64,
    pub status: String,
    #[serde(default)]
    pub billing_type: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Gateway subscription this charge belongs to
    #[serde(default)]
    pub subscription: Option<String>,
    /// Our organization id, stamped at subscription creation
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub invoice_url: Option<String>,
    #[serde(default)]
    pub bank_slip_url: Option<String>,
    #[serde(default)]
    pub transaction_receipt_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl GatewayPayment {
    pub fn mapped_status(&self) -> PaymentStatus {
        map_gateway_status(&self.status)
    }

    pub fn amount_cents(&self) -> i64 {
        reais_to_cents(self.value)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Paged<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayErrorBody {
    #[serde(default)]
    errors: Vec<GatewayErrorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayErrorEntry {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionBody<'a> {
    customer: &'a str,
    billing_type: &'a str,
    value: f64,
    next_due_date: String,
    cycle: &'a str,
    description: &'a str,
    external_reference: &'a str,
}

// =============================================================================
// Status and currency mapping
// =============================================================================

/// Map an Asaas payment status to the local vocabulary.
/// Total over arbitrary input; unrecognized statuses are Unknown, never Paid.
pub fn map_gateway_status(status: &str) -> PaymentStatus {
    match status {
        "CONFIRMED" | "RECEIVED" | "RECEIVED_IN_CASH" => PaymentStatus::Paid,
        "PENDING" | "AWAITING_RISK_ANALYSIS" => PaymentStatus::Pending,
        "OVERDUE" => PaymentStatus::Failed,
        "REFUNDED" | "REFUND_REQUESTED" | "CHARGEBACK_REQUESTED" | "CHARGEBACK_DISPUTE"
        | "AWAITING_CHARGEBACK_REVERSAL" => PaymentStatus::Canceled,
        _ => PaymentStatus::Unknown,
    }
}

pub fn cents_to_reais(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub fn reais_to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn sanitize_tax_id(doc: &str) -> String {
    doc.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn format_due_date(date: Date) -> BillingResult<String> {
    let fmt = format_description!("[year]-[month]-[day]");
    date.format(&fmt)
        .map_err(|e| BillingError::Internal(format!("date format: {}", e)))
}

// =============================================================================
// Client
// =============================================================================

/// Asaas API client
#[derive(Clone)]
pub struct AsaasClient {
    http: reqwest::Client,
    config: AsaasConfig,
}

impl AsaasClient {
    pub fn new(config: AsaasConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.post(self.url(path)))
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.delete(self.url(path)))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("access_token", &self.config.api_key)
            .header("User-Agent", "Lexflow")
    }

    /// Surface the gateway's error descriptions when a request fails
    async fn check(response: reqwest::Response) -> BillingResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body: GatewayErrorBody = response.json().await.unwrap_or(GatewayErrorBody {
            errors: Vec::new(),
        });
        let detail = if body.errors.is_empty() {
            format!("HTTP {}", status)
        } else {
            body.errors
                .into_iter()
                .map(|e| e.description)
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(BillingError::GatewayApi(detail))
    }

    /// Find the gateway customer for an organization by email, or create one.
    ///
    /// Asaas requires a CPF/CNPJ to bill PIX and boleto, so a missing tax id
    /// fails fast before anything is created.
    pub async fn find_or_create_customer(&self, org: &Organization) -> BillingResult<String> {
        let tax_id = org
            .tax_id
            .as_deref()
            .map(sanitize_tax_id)
            .filter(|d| !d.is_empty())
            .ok_or(BillingError::MissingTaxId)?;

        let lookup = self
            .get("/customers")
            .query(&[("email", org.email.as_str()), ("limit", "1")])
            .send()
            .await?;
        let found: Paged<GatewayCustomer> = Self::check(lookup).await?.json().await?;

        if let Some(existing) = found.data.into_iter().next() {
            // Keep the gateway record current; failure here is not fatal
            let mut update = serde_json::json!({ "cpfCnpj": tax_id });
            if let Some(phone) = &org.phone {
                update["mobilePhone"] = serde_json::json!(phone);
            }
            let updated = self
                .post(&format!("/customers/{}", existing.id))
                .json(&update)
                .send()
                .await;
            match updated {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(
                        org_id = %org.id,
                        customer_id = %existing.id,
                        status = %resp.status(),
                        "failed to refresh gateway customer data"
                    );
                }
                Err(e) => {
                    tracing::warn!(org_id = %org.id, error = %e, "failed to refresh gateway customer data");
                }
                Ok(_) => {}
            }
            return Ok(existing.id);
        }

        let mut create = serde_json::json!({
            "name": org.name,
            "email": org.email,
            "cpfCnpj": tax_id,
        });
        if let Some(phone) = &org.phone {
            create["mobilePhone"] = serde_json::json!(phone);
        }
        let response = self.post("/customers").json(&create).send().await?;
        let customer: GatewayCustomer = Self::check(response).await?.json().await?;
        Ok(customer.id)
    }

    /// Create a recurring subscription; first charge is due on `next_due_date`
    #[allow(clippy::too_many_arguments)]
    pub async fn create_subscription(
        &self,
        customer: &str,
        billing_type: &str,
        value_cents: i64,
        next_due_date: Date,
        cycle: &str,
        description: &str,
        external_reference: &str,
    ) -> BillingResult<GatewaySubscription> {
        let body = CreateSubscriptionBody {
            customer,
            billing_type,
            value: cents_to_reais(value_cents),
            next_due_date: format_due_date(next_due_date)?,
            cycle,
            description,
            external_reference,
        };
        let response = self.post("/subscriptions").json(&body).send().await?;
        let subscription: GatewaySubscription = Self::check(response).await?.json().await?;
        Ok(subscription)
    }

    pub async fn get_subscription(&self, id: &str) -> BillingResult<GatewaySubscription> {
        let response = self.get(&format!("/subscriptions/{}", id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::NotFound(format!("subscription {}", id)));
        }
        let subscription: GatewaySubscription = Self::check(response).await?.json().await?;
        Ok(subscription)
    }

    /// Charges generated by a gateway subscription
    pub async fn list_subscription_payments(&self, id: &str) -> BillingResult<Vec<GatewayPayment>> {
        let response = self
            .get(&format!("/subscriptions/{}/payments", id))
            .send()
            .await?;
        let page: Paged<GatewayPayment> = Self::check(response).await?.json().await?;
        Ok(page.data)
    }

    /// All charges for a gateway customer (newest first, bounded history)
    pub async fn list_customer_payments(&self, customer: &str) -> BillingResult<Vec<GatewayPayment>> {
        let response = self
            .get("/payments")
            .query(&[("customer", customer), ("limit", "20")])
            .send()
            .await?;
        let page: Paged<GatewayPayment> = Self::check(response).await?.json().await?;
        Ok(page.data)
    }

    /// Cancel a gateway subscription. A 404 means it is already gone, which is
    /// the outcome the caller wanted.
    pub async fn delete_subscription(&self, id: &str) -> BillingResult<()> {
        let response = self.delete(&format!("/subscriptions/{}", id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(subscription_id = %id, "gateway subscription already removed");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}
