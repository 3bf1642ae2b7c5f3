use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Substitute period when a gateway timestamp cannot be parsed.
pub const FALLBACK_PERIOD_DAYS: i64 = 30;

/// key: billing-gateway-event -> inbound webhook envelope
///
/// Field names are accepted both in the gateway's snake_case wire form and in camelCase.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    #[serde(alias = "triggerType")]
    pub trigger_type: String,
    #[serde(default, alias = "subscriptionData")]
    pub subscription_data: Option<SubscriptionData>,
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<i64>,
    #[serde(default, alias = "cardData")]
    pub card_data: Option<CardData>,
    /// Signature echoed by the gateway inside the body. Transport-level verification uses the
    /// request header instead.
    #[serde(default)]
    pub hmac: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionData {
    pub id: i64,
    #[serde(default, alias = "clientInfo")]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "amountCents")]
    pub amount_cents: Option<i64>,
    #[serde(default, alias = "nextBilling")]
    pub next_billing: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "maskedPan")]
    pub masked_pan: Option<String>,
}

impl SubscriptionData {
    pub fn client_email(&self) -> Option<&str> {
        self.client_info
            .as_ref()
            .and_then(|info| info.email.as_deref())
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    pub fn parsed_next_billing(&self) -> Option<DateTime<Utc>> {
        self.next_billing.as_deref().and_then(parse_gateway_timestamp)
    }

    /// Next billing instant, or `now + 30 days` when the gateway sent something unusable.
    pub fn next_billing_or_fallback(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.parsed_next_billing() {
            Some(instant) => instant,
            None => {
                tracing::warn!(
                    external_id = self.id,
                    next_billing = ?self.next_billing,
                    "unparseable next billing date; substituting fallback period"
                );
                now + Duration::days(FALLBACK_PERIOD_DAYS)
            }
        }
    }
}

/// Lifecycle transitions the engine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleTrigger {
    Created,
    Suspended,
    Resumed,
    Canceled,
    Updated,
    ChargeSucceeded,
    ChargeFailed,
    OverdueChargeFailed,
}

/// Notifications that are acknowledged without touching state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredTrigger {
    CardAdded,
    CardDeleted,
    WebhookRegistered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Lifecycle(LifecycleTrigger),
    Ignored(IgnoredTrigger),
    Unknown(String),
}

impl Trigger {
    /// Tolerates case, spaces, dashes and dots: `"Subscription Created"` and
    /// `"subscription.created"` classify the same.
    pub fn classify(raw: &str) -> Trigger {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' | '.' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();

        let lifecycle = match normalized.as_str() {
            "subscription_created" | "created" => Some(LifecycleTrigger::Created),
            "subscription_suspended" | "suspended" => Some(LifecycleTrigger::Suspended),
            "subscription_resumed" | "resumed" => Some(LifecycleTrigger::Resumed),
            "subscription_canceled" | "subscription_cancelled" | "canceled" | "cancelled" => {
                Some(LifecycleTrigger::Canceled)
            }
            "subscription_updated" | "updated" => Some(LifecycleTrigger::Updated),
            "successful_transaction" => Some(LifecycleTrigger::ChargeSucceeded),
            "failed_transaction" => Some(LifecycleTrigger::ChargeFailed),
            "failed_overdue_transaction" => Some(LifecycleTrigger::OverdueChargeFailed),
            _ => None,
        };
        if let Some(trigger) = lifecycle {
            return Trigger::Lifecycle(trigger);
        }

        match normalized.as_str() {
            "card_added" | "add_card" => Trigger::Ignored(IgnoredTrigger::CardAdded),
            "card_deleted" | "delete_card" => Trigger::Ignored(IgnoredTrigger::CardDeleted),
            "register_webhook" | "webhook_registered" => {
                Trigger::Ignored(IgnoredTrigger::WebhookRegistered)
            }
            _ => Trigger::Unknown(raw.to_string()),
        }
    }
}

/// Tagged view of an inbound event, keyed by trigger.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Lifecycle {
        trigger: LifecycleTrigger,
        data: SubscriptionData,
    },
    /// A handled trigger that arrived without its subscription payload.
    Incomplete(LifecycleTrigger),
    Ignored(IgnoredTrigger),
    Unknown(String),
}

impl GatewayEvent {
    pub fn parse(self) -> ParsedEvent {
        match Trigger::classify(&self.trigger_type) {
            Trigger::Lifecycle(trigger) => match self.subscription_data {
                Some(data) => ParsedEvent::Lifecycle { trigger, data },
                None => ParsedEvent::Incomplete(trigger),
            },
            Trigger::Ignored(ignored) => ParsedEvent::Ignored(ignored),
            Trigger::Unknown(raw) => ParsedEvent::Unknown(raw),
        }
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]` (read as UTC) and bare dates.
pub fn parse_gateway_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}
