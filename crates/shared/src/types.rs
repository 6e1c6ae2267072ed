//! Core domain enums shared by the billing crate and the API server.
//!
//! All of these are stored as plain TEXT columns; the enums own the string
//! mapping so the SQL layer stays free of magic literals.

use serde::{Deserialize, Serialize};

/// Plan tiers, ordered by value. `Student` is the free tier and never
/// requires external billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Student,
    Solo,
    Clinic,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Student => "student",
            PlanTier::Solo => "solo",
            PlanTier::Clinic => "clinic",
            PlanTier::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(PlanTier::Student),
            "solo" => Some(PlanTier::Solo),
            "clinic" => Some(PlanTier::Clinic),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// License lifecycle states.
///
/// `Cancelling` means cancel-at-period-end has been requested but the
/// subscription is still live; `Cancelled` is terminal and clears
/// `is_active` on the license row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Trial,
    Active,
    Cancelling,
    PaymentFailed,
    PastDue,
    Cancelled,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Trial => "trial",
            LicenseStatus::Active => "active",
            LicenseStatus::Cancelling => "cancelling",
            LicenseStatus::PaymentFailed => "payment_failed",
            LicenseStatus::PastDue => "past_due",
            LicenseStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial" => Some(LicenseStatus::Trial),
            "active" => Some(LicenseStatus::Active),
            "cancelling" => Some(LicenseStatus::Cancelling),
            "payment_failed" => Some(LicenseStatus::PaymentFailed),
            "past_due" => Some(LicenseStatus::PastDue),
            "cancelled" => Some(LicenseStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing period selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Annual => "annual",
        }
    }

    /// Lenient parse used for checkout metadata and request bodies; anything
    /// unrecognized falls back to monthly, matching the upstream default.
    pub fn parse_or_monthly(s: &str) -> Self {
        if s.eq_ignore_ascii_case("annual") || s.eq_ignore_ascii_case("yearly") {
            BillingPeriod::Annual
        } else {
            BillingPeriod::Monthly
        }
    }
}

/// Student verification submission states. `Approved` and `Rejected` are
/// terminal; a decided row can never be re-reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "approved" => Some(VerificationStatus::Approved),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_follows_value() {
        assert!(PlanTier::Student < PlanTier::Solo);
        assert!(PlanTier::Solo < PlanTier::Clinic);
        assert!(PlanTier::Clinic < PlanTier::Enterprise);
    }

    #[test]
    fn license_status_round_trips() {
        for status in [
            LicenseStatus::Trial,
            LicenseStatus::Active,
            LicenseStatus::Cancelling,
            LicenseStatus::PaymentFailed,
            LicenseStatus::PastDue,
            LicenseStatus::Cancelled,
        ] {
            assert_eq!(LicenseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LicenseStatus::parse("bogus"), None);
    }

    #[test]
    fn billing_period_defaults_to_monthly() {
        assert_eq!(BillingPeriod::parse_or_monthly("annual"), BillingPeriod::Annual);
        assert_eq!(BillingPeriod::parse_or_monthly("YEARLY"), BillingPeriod::Annual);
        assert_eq!(BillingPeriod::parse_or_monthly("monthly"), BillingPeriod::Monthly);
        assert_eq!(BillingPeriod::parse_or_monthly(""), BillingPeriod::Monthly);
        assert_eq!(BillingPeriod::parse_or_monthly("weekly"), BillingPeriod::Monthly);
    }
}
