use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: billing-subscription-status -> active|inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    /// Only the exact gateway state `active` is active; anything else collapses to `Inactive`.
    pub fn from_gateway_state(state: &str) -> Self {
        if state == "active" {
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Inactive
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SubscriptionStatus::Active),
            "inactive" => Some(SubscriptionStatus::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// key: billing-subscription-model -> one row per tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: SubscriptionStatus,
    pub external_subscription_id: i64,
    pub amount_cents: i64,
    pub last_renewal_date: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    /// Bumped on every write; used for compare-and-save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// True when `other` carries the same gateway-visible state as `self`.
    pub fn same_billing_state(&self, other: &Subscription) -> bool {
        self.status == other.status
            && self.external_subscription_id == other.external_subscription_id
            && self.amount_cents == other.amount_cents
            && self.current_period_end == other.current_period_end
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: Uuid,
    pub status: SubscriptionStatus,
    pub external_subscription_id: i64,
    pub amount_cents: i64,
    pub last_renewal_date: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
}

impl NewSubscription {
    pub fn into_subscription(self, now: DateTime<Utc>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            status: self.status,
            external_subscription_id: self.external_subscription_id,
            amount_cents: self.amount_cents,
            last_renewal_date: self.last_renewal_date,
            current_period_end: self.current_period_end,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub external_subscription_id: i64,
    pub amount_cents: i64,
    pub last_renewal_date: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = anyhow::Error;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = SubscriptionStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown subscription status `{}`", row.status))?;
        Ok(Subscription {
            id: row.id,
            tenant_id: row.tenant_id,
            status,
            external_subscription_id: row.external_subscription_id,
            amount_cents: row.amount_cents,
            last_renewal_date: row.last_renewal_date,
            current_period_end: row.current_period_end,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// key: billing-tenant -> account directory entry
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub email: String,
    pub name: String,
}

/// key: billing-plan -> derived purely from subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Paid,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Free => f.write_str("free"),
            Plan::Paid => f.write_str("paid"),
        }
    }
}

/// key: billing-task-kind -> one pending task per tenant and kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "billing-sync")]
    BillingSync,
    #[serde(rename = "cleanup")]
    Cleanup,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::BillingSync => "billing-sync",
            TaskKind::Cleanup => "cleanup",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "billing-sync" => Some(TaskKind::BillingSync),
            "cleanup" => Some(TaskKind::Cleanup),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work carried by a pending task. Persisted as JSON next to the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum TaskJob {
    SyncAmount { amount_cents: i64 },
    Cleanup,
}

impl TaskJob {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskJob::SyncAmount { .. } => TaskKind::BillingSync,
            TaskJob::Cleanup => TaskKind::Cleanup,
        }
    }
}

/// key: billing-pending-task -> durable scheduler handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    /// Opaque handle; a new id is minted on every schedule call.
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: TaskKind,
    pub run_at: DateTime<Utc>,
    pub job: TaskJob,
    pub created_at: DateTime<Utc>,
}

impl PendingTask {
    pub fn new(tenant_id: Uuid, run_at: DateTime<Utc>, job: TaskJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            kind: job.kind(),
            run_at,
            job,
            created_at: now,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct PendingTaskRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: String,
    pub run_at: DateTime<Utc>,
    pub payload: sqlx::types::Json<TaskJob>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PendingTaskRow> for PendingTask {
    type Error = anyhow::Error;

    fn try_from(row: PendingTaskRow) -> Result<Self, Self::Error> {
        let kind = TaskKind::parse(&row.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown task kind `{}`", row.kind))?;
        Ok(PendingTask {
            id: row.id,
            tenant_id: row.tenant_id,
            kind,
            run_at: row.run_at,
            job: row.payload.0,
            created_at: row.created_at,
        })
    }
}
