// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Licensing System
//!
//! Tests critical boundary conditions in:
//! - Webhook status reconciliation
//! - Ledger expiry arithmetic
//! - Free plan detection and price resolution
//! - Student verification blocking rules

#[cfg(test)]
mod webhook_reconciliation_tests {
    use crate::webhooks::map_subscription_status;
    use tenlic_shared::LicenseStatus;

    // =========================================================================
    // canceled always maps to cancelled; trialing always maps to trial
    // =========================================================================
    #[test]
    fn test_terminal_status_mappings_are_fixed() {
        use stripe::SubscriptionStatus as S;

        assert_eq!(
            map_subscription_status(S::Canceled),
            Some(LicenseStatus::Cancelled)
        );
        assert_eq!(
            map_subscription_status(S::Trialing),
            Some(LicenseStatus::Trial)
        );
    }

    // =========================================================================
    // Unrecognized external statuses must not move the license
    // =========================================================================
    #[test]
    fn test_unknown_status_is_a_no_op() {
        use stripe::SubscriptionStatus as S;

        for status in [S::Incomplete, S::IncompleteExpired, S::Paused] {
            assert!(
                map_subscription_status(status).is_none(),
                "{:?} must leave the license unchanged",
                status
            );
        }
    }

    // =========================================================================
    // unpaid is a payment failure, not a cancellation
    // =========================================================================
    #[test]
    fn test_unpaid_maps_to_payment_failed() {
        use stripe::SubscriptionStatus as S;

        assert_eq!(
            map_subscription_status(S::Unpaid),
            Some(LicenseStatus::PaymentFailed)
        );
        assert_ne!(
            map_subscription_status(S::Unpaid),
            Some(LicenseStatus::Cancelled)
        );
    }

    // =========================================================================
    // The handled event surface is exactly the five kinds the ledger reacts to
    // =========================================================================
    #[test]
    fn test_handled_event_kinds() {
        let handled = [
            "checkout.session.completed",
            "invoice.payment_succeeded",
            "invoice.payment_failed",
            "customer.subscription.deleted",
            "customer.subscription.updated",
        ];
        assert_eq!(handled.len(), 5, "5 handled event kinds");
    }
}

#[cfg(test)]
mod ledger_expiry_tests {
    use crate::ledger::{
        CHECKOUT_INITIAL_PERIOD, FREE_TIER_NON_EXPIRING_HORIZON, PAYMENT_GRACE_WINDOW,
    };
    use time::macros::datetime;
    use time::Duration;

    // =========================================================================
    // expires_at = invoice period end + 3-day grace window
    // =========================================================================
    #[test]
    fn test_grace_window_applied_to_period_end() {
        let period_end = datetime!(2026-04-30 23:59:59 UTC);
        let expires = period_end + PAYMENT_GRACE_WINDOW;
        assert_eq!(expires, datetime!(2026-05-03 23:59:59 UTC));
    }

    // =========================================================================
    // Free-tier horizon must dwarf any real billing period
    // =========================================================================
    #[test]
    fn test_non_expiring_horizon_magnitude() {
        assert!(FREE_TIER_NON_EXPIRING_HORIZON > Duration::days(365 * 99));
        assert!(FREE_TIER_NON_EXPIRING_HORIZON > CHECKOUT_INITIAL_PERIOD * 1000);
    }

    // =========================================================================
    // Provisional checkout period matches one billing month
    // =========================================================================
    #[test]
    fn test_checkout_initial_period() {
        assert_eq!(CHECKOUT_INITIAL_PERIOD, Duration::days(30));
    }
}

#[cfg(test)]
mod plan_catalog_tests {
    use crate::catalog::PaymentPlan;
    use tenlic_shared::BillingPeriod;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn plan(monthly_cents: i64, yearly_cents: Option<i64>, tier: &str) -> PaymentPlan {
        let now = OffsetDateTime::now_utc();
        PaymentPlan {
            id: Uuid::new_v4(),
            name: "Test".to_string(),
            description: None,
            tier: tier.to_string(),
            monthly_price_cents: monthly_cents,
            yearly_price_cents: yearly_cents,
            included_seats: 1,
            extra_seat_price_cents: None,
            stripe_product_id: None,
            stripe_price_id_monthly: Some("price_monthly".to_string()),
            stripe_price_id_yearly: None,
            stripe_price_id_per_seat: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    // =========================================================================
    // Zero monthly and zero/absent yearly price means free tier
    // =========================================================================
    #[test]
    fn test_free_plan_detection() {
        assert!(plan(0, None, "student").is_free());
        assert!(plan(0, Some(0), "student").is_free());
        assert!(!plan(4900, Some(49_000), "solo").is_free());
        // A plan that is free monthly but priced yearly is not free
        assert!(!plan(0, Some(49_000), "solo").is_free());
    }

    // =========================================================================
    // Student tier flag follows the tier label, not the price
    // =========================================================================
    #[test]
    fn test_student_tier_detection() {
        assert!(plan(0, None, "student").is_student_tier());
        assert!(!plan(0, None, "solo").is_student_tier());
        assert!(!plan(0, None, "Student").is_student_tier(), "tier labels are lowercase");
    }

    // =========================================================================
    // Missing yearly price ref is a configuration error for annual checkout
    // =========================================================================
    #[test]
    fn test_price_resolution_by_period() {
        let p = plan(4900, Some(49_000), "solo");
        assert_eq!(p.price_id_for(BillingPeriod::Monthly), Some("price_monthly"));
        assert_eq!(p.price_id_for(BillingPeriod::Annual), None);
    }
}

#[cfg(test)]
mod verification_blocking_tests {
    use crate::verification::{
        month_start, validate_document, BLOCK_DURATION, MAX_DOCUMENT_SIZE_BYTES,
        MAX_REJECTIONS_PER_MONTH,
    };
    use time::macros::datetime;

    // =========================================================================
    // Exactly 3 rejections in a month crosses the threshold; 2 does not
    // =========================================================================
    #[test]
    fn test_rejection_threshold_boundary() {
        assert!(2 < MAX_REJECTIONS_PER_MONTH, "2 rejections must not block");
        assert!(3 >= MAX_REJECTIONS_PER_MONTH, "3rd rejection must block");
    }

    // =========================================================================
    // blocked_until is exactly 30 days after the crossing rejection
    // =========================================================================
    #[test]
    fn test_block_window_arithmetic() {
        let third_rejection = datetime!(2026-01-31 12:00 UTC);
        assert_eq!(
            third_rejection + BLOCK_DURATION,
            datetime!(2026-03-02 12:00 UTC)
        );
    }

    // =========================================================================
    // Rejections from last month don't count against this month's window
    // =========================================================================
    #[test]
    fn test_month_window_resets() {
        let now = datetime!(2026-02-02 8:00 UTC);
        let window = month_start(now);
        assert_eq!(window, datetime!(2026-02-01 0:00 UTC));

        let last_month_rejection = datetime!(2026-01-31 23:59 UTC);
        assert!(last_month_rejection < window, "previous month is outside the window");

        let this_month_rejection = datetime!(2026-02-01 0:00 UTC);
        assert!(this_month_rejection >= window, "first instant of the month counts");
    }

    // =========================================================================
    // Document size boundary: 10 MB accepted, one byte over rejected
    // =========================================================================
    #[test]
    fn test_document_size_boundary() {
        assert!(validate_document("application/pdf", MAX_DOCUMENT_SIZE_BYTES).is_ok());
        assert!(validate_document("application/pdf", MAX_DOCUMENT_SIZE_BYTES + 1).is_err());
        assert!(validate_document("application/pdf", 0).is_err());
    }

    // =========================================================================
    // Content type allowlist is case-insensitive and closed
    // =========================================================================
    #[test]
    fn test_document_type_allowlist() {
        assert!(validate_document("image/webp", 100).is_ok());
        assert!(validate_document("IMAGE/PNG", 100).is_ok());
        assert!(validate_document("image/svg+xml", 100).is_err());
        assert!(validate_document("application/zip", 100).is_err());
    }
}
