//! Common types used across Lexflow

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan for billing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Professional,
    Enterprise,
}

impl Default for Plan {
    fn default() -> Self {
        Self::Free
    }
}

impl Plan {
    /// Whether this plan is charged through the payment gateway.
    /// Free never reaches the gateway; Enterprise is invoiced manually (contact sales).
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Basic | Self::Professional)
    }

    /// Whether this plan requires a sales conversation instead of self-serve checkout
    pub fn is_contact_sales(&self) -> bool {
        matches!(self, Self::Enterprise)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Basic => write!(f, "basic"),
            Self::Professional => write!(f, "professional"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    /// Case-insensitive, accepting the marketing synonyms used by older clients
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" | "starter" => Ok(Self::Basic),
            "professional" | "pro" => Ok(Self::Professional),
            "enterprise" | "office" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan: {}", s)),
        }
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Pending,
    Canceled,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Pending => write!(f, "pending"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Payment status in the local ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
    Unknown,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PaymentStatus {
    /// Only a settled payment may activate a plan
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// User role within an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Member
    }
}

impl UserRole {
    /// Get the permission level for this role (higher = more permissions)
    /// Owner: 3, Admin: 2, Member: 1, Viewer: 0
    pub fn level(&self) -> u8 {
        match self {
            Self::Owner => 3,
            Self::Admin => 2,
            Self::Member => 1,
            Self::Viewer => 0,
        }
    }

    /// Check if this role can administer the organization
    /// Only Owner and Admin can administer (and therefore manage billing)
    pub fn can_administer(&self) -> bool {
        self.level() >= 2
    }

    /// Parse a role from string (case insensitive)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "member" => Self::Member,
            "viewer" => Self::Viewer,
            _ => Self::Member, // Default to member for unknown roles
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Organization (tenant) model, including the billing profile sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Registered legal name shown on invoices
    pub legal_name: Option<String>,
    /// CPF/CNPJ; required before checkout can create a gateway customer
    pub tax_id: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    /// Gateway customer id, set on first checkout
    pub asaas_customer_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: String,
    pub created_at: OffsetDateTime,
}

/// Subscription model (exactly one row per organization)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    /// Gateway subscription id; None until a checkout has been initiated
    pub external_subscription_id: Option<String>,
    pub amount_cents: i64,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// Whether the paid period has lapsed at `now`. Any non-free plan with a
    /// period end in the past counts, enterprise included: those rows exist
    /// when an old charge description resolved to enterprise.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.plan != Plan::Free
            && self
                .current_period_end
                .is_some_and(|end| end < now)
    }
}

/// Local payment ledger row (never deleted, audit trail)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Gateway payment id; None until the gateway reports the first charge
    pub external_id: Option<String>,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub method: String,
    /// The plan this payment would activate once settled
    pub plan_id: Option<Plan>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    // =========================================================================
    // Plan Tests
    // =========================================================================

    #[test]
    fn test_plan_default() {
        assert_eq!(Plan::default(), Plan::Free);
    }

    #[test]
    fn test_plan_is_paid() {
        assert!(!Plan::Free.is_paid());
        assert!(Plan::Basic.is_paid());
        assert!(Plan::Professional.is_paid());
        assert!(!Plan::Enterprise.is_paid());
        assert!(Plan::Enterprise.is_contact_sales());
    }

    #[test]
    fn test_plan_display() {
        assert_eq!(format!("{}", Plan::Free), "free");
        assert_eq!(format!("{}", Plan::Basic), "basic");
        assert_eq!(format!("{}", Plan::Professional), "professional");
        assert_eq!(format!("{}", Plan::Enterprise), "enterprise");
    }

    #[test]
    fn test_plan_from_str_canonical() {
        assert_eq!("free".parse::<Plan>().unwrap(), Plan::Free);
        assert_eq!("basic".parse::<Plan>().unwrap(), Plan::Basic);
        assert_eq!("professional".parse::<Plan>().unwrap(), Plan::Professional);
        assert_eq!("enterprise".parse::<Plan>().unwrap(), Plan::Enterprise);
    }

    #[test]
    fn test_plan_from_str_synonyms() {
        assert_eq!("starter".parse::<Plan>().unwrap(), Plan::Basic);
        assert_eq!("pro".parse::<Plan>().unwrap(), Plan::Professional);
        assert_eq!("office".parse::<Plan>().unwrap(), Plan::Enterprise);
    }

    #[test]
    fn test_plan_from_str_case_insensitive() {
        assert_eq!("PRO".parse::<Plan>().unwrap(), Plan::Professional);
        assert_eq!("Office".parse::<Plan>().unwrap(), Plan::Enterprise);
        assert_eq!(" Basic ".parse::<Plan>().unwrap(), Plan::Basic);
    }

    #[test]
    fn test_plan_from_str_invalid() {
        assert!("platinum".parse::<Plan>().is_err());
        assert!("".parse::<Plan>().is_err());
    }

    // =========================================================================
    // SubscriptionStatus Tests
    // =========================================================================

    #[test]
    fn test_subscription_status_default() {
        assert_eq!(SubscriptionStatus::default(), SubscriptionStatus::Active);
    }

    #[test]
    fn test_subscription_status_parse() {
        assert_eq!(
            "active".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Active
        );
        assert_eq!(
            "cancelled".parse::<SubscriptionStatus>().unwrap(),
            SubscriptionStatus::Canceled
        );
        assert!("paused".parse::<SubscriptionStatus>().is_err());
    }

    // =========================================================================
    // PaymentStatus Tests
    // =========================================================================

    #[test]
    fn test_payment_status_is_paid() {
        assert!(PaymentStatus::Paid.is_paid());
        assert!(!PaymentStatus::Pending.is_paid());
        assert!(!PaymentStatus::Unknown.is_paid());
    }

    // =========================================================================
    // UserRole Tests
    // =========================================================================

    #[test]
    fn test_user_role_default() {
        assert_eq!(UserRole::default(), UserRole::Member);
    }

    #[test]
    fn test_user_role_levels() {
        assert_eq!(UserRole::Viewer.level(), 0);
        assert_eq!(UserRole::Member.level(), 1);
        assert_eq!(UserRole::Admin.level(), 2);
        assert_eq!(UserRole::Owner.level(), 3);
    }

    #[test]
    fn test_user_role_can_administer() {
        assert!(!UserRole::Viewer.can_administer());
        assert!(!UserRole::Member.can_administer());
        assert!(UserRole::Admin.can_administer());
        assert!(UserRole::Owner.can_administer());
    }

    #[test]
    fn test_user_role_from_str_lossy() {
        assert_eq!(UserRole::from_str_lossy("owner"), UserRole::Owner);
        assert_eq!(UserRole::from_str_lossy("ADMIN"), UserRole::Admin);
        assert_eq!(UserRole::from_str_lossy("unknown"), UserRole::Member); // Default
    }

    // =========================================================================
    // Subscription Tests
    // =========================================================================

    fn subscription(plan: Plan, period_end: Option<OffsetDateTime>) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            plan,
            status: SubscriptionStatus::Active,
            external_subscription_id: None,
            amount_cents: 0,
            current_period_start: None,
            current_period_end: period_end,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_subscription_expiry() {
        let now = OffsetDateTime::now_utc();
        let lapsed = subscription(Plan::Professional, Some(now - Duration::days(1)));
        let current = subscription(Plan::Professional, Some(now + Duration::days(10)));
        let open_ended = subscription(Plan::Professional, None);
        let free = subscription(Plan::Free, Some(now - Duration::days(1)));
        // Enterprise rows come from description inference; they lapse too
        let enterprise = subscription(Plan::Enterprise, Some(now - Duration::days(1)));

        assert!(lapsed.is_expired_at(now));
        assert!(!current.is_expired_at(now));
        assert!(!open_ended.is_expired_at(now));
        // Free plans never expire regardless of stale period data
        assert!(!free.is_expired_at(now));
        assert!(enterprise.is_expired_at(now));
    }
}
