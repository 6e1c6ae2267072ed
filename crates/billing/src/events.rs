//! Outbound domain event notifications.
//!
//! Fire-and-forget publication over Redis pub/sub. The ledger is always
//! updated before a notification is attempted, so delivery is best-effort
//! and failures are logged, never propagated.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

pub const PLAN_UPDATED_CHANNEL: &str = "billing.plan_updated";
pub const SUBSCRIPTION_STATUS_CHANGED_CHANNEL: &str = "billing.subscription_status_changed";

/// Published after the plan change orchestrator commits a plan swap.
#[derive(Debug, Clone, Serialize)]
pub struct PlanUpdatedEvent {
    pub tenant_id: String,
    pub plan_id: Uuid,
    pub plan_tier: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Published after a subscription-updated webhook changes a license.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatusChangedEvent {
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub status: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

/// Best-effort publisher for downstream services (tenancy, notifications).
#[derive(Clone)]
pub struct Notifier {
    conn: Option<ConnectionManager>,
}

impl Notifier {
    /// Connect to Redis. A connection failure downgrades to a disabled
    /// notifier rather than failing startup; the ledger does not depend on
    /// notifications for correctness.
    pub async fn connect(redis_url: &str) -> Self {
        let conn = match redis::Client::open(redis_url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(conn) => {
                    tracing::info!("Outbound notifier connected to Redis");
                    Some(conn)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable, outbound notifications disabled");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL, outbound notifications disabled");
                None
            }
        };

        Self { conn }
    }

    /// A notifier that drops every event. Used when Redis is unconfigured
    /// and in tests.
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn publish_plan_updated(&self, event: &PlanUpdatedEvent) {
        self.publish(PLAN_UPDATED_CHANNEL, event).await;
    }

    pub async fn publish_subscription_status_changed(
        &self,
        event: &SubscriptionStatusChangedEvent,
    ) {
        self.publish(SUBSCRIPTION_STATUS_CHANGED_CHANNEL, event).await;
    }

    async fn publish<T: Serialize>(&self, channel: &str, event: &T) {
        let Some(conn) = &self.conn else {
            return;
        };

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(channel, error = %e, "Failed to serialize outbound event");
                return;
            }
        };

        let mut conn = conn.clone();
        if let Err(e) = conn.publish::<_, _, ()>(channel, payload).await {
            tracing::warn!(channel, error = %e, "Failed to publish outbound event");
        } else {
            tracing::debug!(channel, "Published outbound event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_reports_disabled() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
    }

    #[tokio::test]
    async fn disabled_notifier_drops_events_silently() {
        let notifier = Notifier::disabled();
        notifier
            .publish_plan_updated(&PlanUpdatedEvent {
                tenant_id: "acme".to_string(),
                plan_id: Uuid::new_v4(),
                plan_tier: "solo".to_string(),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await;
    }
}
