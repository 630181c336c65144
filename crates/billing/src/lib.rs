// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Lexflow Billing Module
//!
//! Handles Asaas integration for subscriptions, payment reconciliation, and invoicing.
//!
//! ## Features
//!
//! - **Plan Catalog**: Canonical plans, prices, and charge descriptions
//! - **Gateway Client**: Customers, subscriptions, and payments on the Asaas REST API
//! - **Subscription Store**: One subscription row per organization, upsert semantics
//! - **Reconciliation**: Read-time convergence of local state with the gateway ledger
//! - **Checkout**: Self-serve subscription creation with coupon support
//! - **Webhooks**: Handle Asaas payment and subscription lifecycle events

pub mod catalog;
pub mod checkout;
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

// Catalog
pub use catalog::{PlanSpec, PROMO_PRICE_CENTS};

// Checkout
pub use checkout::{CheckoutOutcome, CheckoutService};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{AsaasClient, AsaasConfig, GatewayPayment, GatewaySubscription};

// Reconciliation
pub use reconcile::{BillingView, InvoiceEntry, ReconciliationEngine};

// Store
pub use store::{PaymentLedger, SubscriptionStore};

// Subscriptions
pub use subscriptions::{CancellationOutcome, SubscriptionService};

// Webhooks
pub use webhooks::{WebhookEvent, WebhookProcessor};
