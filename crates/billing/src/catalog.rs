//! Plan catalog: canonical plans, prices, and charge descriptions
//!
//! Prices are integer cents (BRL minor units). The catalog is also the single
//! source for the charge descriptions sent to the gateway, because
//! [`infer_plan_from_description`] parses those same strings when an old
//! payment has no structured plan reference.

use lexflow_shared::Plan;

use crate::error::{BillingError, BillingResult};

/// Fixed first-charge price (cents) when a coupon is applied at checkout
pub const PROMO_PRICE_CENTS: i64 = 100;

/// Catalog entry for a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSpec {
    pub plan: Plan,
    /// None for plans without a self-serve price (enterprise)
    pub monthly_price_cents: Option<i64>,
    pub description: String,
}

impl PlanSpec {
    pub fn for_plan(plan: Plan) -> Self {
        Self {
            plan,
            monthly_price_cents: price_cents(plan),
            description: standard_description(plan),
        }
    }
}

/// Monthly price in cents; None when the plan has no self-serve price
pub fn price_cents(plan: Plan) -> Option<i64> {
    match plan {
        Plan::Free => Some(0),
        Plan::Basic => Some(9_900),
        Plan::Professional => Some(29_900),
        Plan::Enterprise => None,
    }
}

/// Resolve a user-supplied plan token (case-insensitive, synonyms accepted)
pub fn resolve(token: &str) -> BillingResult<Plan> {
    token
        .parse::<Plan>()
        .map_err(|_| BillingError::UnknownPlan(token.to_string()))
}

/// Charge description for a standard subscription
pub fn standard_description(plan: Plan) -> String {
    match plan {
        Plan::Free => "Lexflow - Plano Gratuito".to_string(),
        Plan::Basic => "Lexflow - Plano Basic (mensal)".to_string(),
        Plan::Professional => "Lexflow - Plano Professional (mensal)".to_string(),
        Plan::Enterprise => "Lexflow - Plano Enterprise (mensal)".to_string(),
    }
}

/// Charge description for a coupon checkout (promotional first month)
pub fn promo_description(plan: Plan) -> String {
    match plan {
        Plan::Free => "Lexflow - Plano Gratuito".to_string(),
        Plan::Basic => "Lexflow - Plano Basic (cupom promocional)".to_string(),
        Plan::Professional => "Lexflow - Plano Professional (cupom promocional)".to_string(),
        Plan::Enterprise => "Lexflow - Plano Enterprise (cupom promocional)".to_string(),
    }
}

/// Last-resort plan inference from a gateway charge description.
///
/// Callers must prefer the structured plan reference (ledger `plan_id` or the
/// gateway `externalReference`) and only fall through to this heuristic for
/// payments created before those references existed.
pub fn infer_plan_from_description(description: &str) -> Plan {
    let desc = description.to_lowercase();
    if desc.contains("professional") || desc.contains("plano pro") {
        Plan::Professional
    } else if desc.contains("office") || desc.contains("enterprise") {
        Plan::Enterprise
    } else {
        Plan::Basic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prices() {
        assert_eq!(price_cents(Plan::Free), Some(0));
        assert_eq!(price_cents(Plan::Basic), Some(9_900));
        assert_eq!(price_cents(Plan::Professional), Some(29_900));
        assert_eq!(price_cents(Plan::Enterprise), None);
    }

    #[test]
    fn test_resolve_synonyms() {
        assert_eq!(resolve("starter").unwrap(), Plan::Basic);
        assert_eq!(resolve("pro").unwrap(), Plan::Professional);
        assert_eq!(resolve("office").unwrap(), Plan::Enterprise);
        assert_eq!(resolve("PRO").unwrap(), Plan::Professional);
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(matches!(resolve("gold"), Err(BillingError::UnknownPlan(_))));
    }

    #[test]
    fn test_inference_precedence() {
        assert_eq!(
            infer_plan_from_description("Renovação plano pro"),
            Plan::Professional
        );
        assert_eq!(
            infer_plan_from_description("Office suite subscription"),
            Plan::Enterprise
        );
        // Anything unrecognized falls back to the cheapest paid plan
        assert_eq!(infer_plan_from_description("monthly charge"), Plan::Basic);
    }

    /// Descriptions written at checkout must round-trip through the inference
    /// heuristic, otherwise self-healing would activate the wrong plan for
    /// payments that predate structured plan references.
    #[test]
    fn test_descriptions_stay_inferable() {
        for plan in [Plan::Basic, Plan::Professional, Plan::Enterprise] {
            assert_eq!(infer_plan_from_description(&standard_description(plan)), plan);
            assert_eq!(infer_plan_from_description(&promo_description(plan)), plan);
        }
    }

    #[test]
    fn test_plan_spec() {
        let spec = PlanSpec::for_plan(Plan::Professional);
        assert_eq!(spec.monthly_price_cents, Some(29_900));
        assert!(spec.description.contains("Professional"));
    }
}
