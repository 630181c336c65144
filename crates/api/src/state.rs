//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use lexflow_billing::{
    AsaasClient, AsaasConfig, CheckoutService, PaymentLedger, ReconciliationEngine,
    SubscriptionService, SubscriptionStore, WebhookProcessor,
};

use crate::auth::JwtManager;
use crate::config::Config;

/// Billing services, built once at startup when billing is enabled
#[derive(Clone)]
pub struct BillingState {
    pub engine: ReconciliationEngine,
    pub checkout: CheckoutService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookProcessor,
}

impl BillingState {
    pub fn build(pool: PgPool) -> Result<Self, lexflow_billing::BillingError> {
        let gateway = AsaasClient::new(AsaasConfig::from_env()?);
        let store = SubscriptionStore::new(pool.clone());
        let ledger = PaymentLedger::new(pool.clone());
        let engine = ReconciliationEngine::new(gateway.clone(), store.clone(), ledger.clone());
        Ok(Self {
            checkout: CheckoutService::new(gateway.clone(), store.clone(), ledger.clone(), pool),
            subscriptions: SubscriptionService::new(gateway, store.clone()),
            webhooks: WebhookProcessor::new(engine.clone(), store, ledger),
            engine,
        })
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    /// None when ENABLE_BILLING=false or the gateway is not configured
    pub billing: Option<Arc<BillingState>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let billing = if config.enable_billing {
            match BillingState::build(pool.clone()) {
                Ok(b) => Some(Arc::new(b)),
                Err(e) => {
                    tracing::warn!(error = %e, "billing disabled: gateway not configured");
                    None
                }
            }
        } else {
            None
        };
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            billing,
        }
    }
}
