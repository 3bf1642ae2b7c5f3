use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    NewSubscription, PendingTask, PendingTaskRow, Subscription, SubscriptionRow, TaskKind, Tenant,
};

/// Postgres `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// key: billing-subscription-store -> single-row optimistic writes
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<Subscription>>;
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Subscription>>;
    /// Returns `None` when the tenant already owns a subscription or the external id is taken.
    async fn insert(&self, record: NewSubscription) -> Result<Option<Subscription>>;
    /// Persists `subscription` if the stored row still carries `subscription.version`.
    /// Returns the saved row (with a bumped version) or `None` on a version conflict or when
    /// another row holds the same external id.
    async fn compare_and_save(&self, subscription: &Subscription) -> Result<Option<Subscription>>;
    /// Deletes the row if it still carries `expected_version`.
    async fn delete(&self, id: Uuid, expected_version: i64) -> Result<bool>;
}

/// key: billing-tenant-directory -> account lookups
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>>;
    /// Case-insensitive.
    async fn find_by_email(&self, email: &str) -> Result<Option<Tenant>>;
}

/// key: billing-task-registry -> (tenant, kind) -> handle
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Atomically stores `task` as the only pending task for its (tenant, kind) and returns the
    /// task it displaced.
    async fn replace(&self, task: &PendingTask) -> Result<Option<PendingTask>>;
    async fn remove(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>>;
    async fn find(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>>;
    /// Removes and returns up to `limit` tasks due at `now`. A claimed task is gone from the
    /// registry, so it fires at most once.
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PendingTask>>;
}

#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load subscription by tenant")?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE external_subscription_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load subscription by external id")?;
        row.map(Subscription::try_from).transpose()
    }

    async fn insert(&self, record: NewSubscription) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            INSERT INTO subscriptions (
                id,
                tenant_id,
                status,
                external_subscription_id,
                amount_cents,
                last_renewal_date,
                current_period_end
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.tenant_id)
        .bind(record.status.as_str())
        .bind(record.external_subscription_id)
        .bind(record.amount_cents)
        .bind(record.last_renewal_date)
        .bind(record.current_period_end)
        .fetch_optional(&self.pool)
        .await
        .context("failed to insert subscription")?;
        row.map(Subscription::try_from).transpose()
    }

    async fn compare_and_save(&self, subscription: &Subscription) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            UPDATE subscriptions
            SET status = $3,
                external_subscription_id = $4,
                amount_cents = $5,
                last_renewal_date = $6,
                current_period_end = $7,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.version)
        .bind(subscription.status.as_str())
        .bind(subscription.external_subscription_id)
        .bind(subscription.amount_cents)
        .bind(subscription.last_renewal_date)
        .bind(subscription.current_period_end)
        .fetch_optional(&self.pool)
        .await;
        let row = match row {
            Ok(row) => row,
            Err(sqlx::Error::Database(err)) if err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                return Ok(None);
            }
            Err(err) => return Err(anyhow::Error::new(err).context("failed to save subscription")),
        };
        row.map(Subscription::try_from).transpose()
    }

    async fn delete(&self, id: Uuid, expected_version: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(expected_version)
            .execute(&self.pool)
            .await
            .context("failed to delete subscription")?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT id, email, name FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load tenant")
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>(
            "SELECT id, email, name FROM tenants WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load tenant by email")
    }
}

#[derive(Clone)]
pub struct PgTaskRegistry {
    pool: PgPool,
}

impl PgTaskRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRegistry for PgTaskRegistry {
    async fn replace(&self, task: &PendingTask) -> Result<Option<PendingTask>> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query_as::<_, PendingTaskRow>(
            "SELECT * FROM billing_pending_tasks WHERE tenant_id = $1 AND kind = $2 FOR UPDATE",
        )
        .bind(task.tenant_id)
        .bind(task.kind.as_str())
        .fetch_optional(&mut tx)
        .await
        .context("failed to lock pending task")?;

        sqlx::query(
            r#"
            INSERT INTO billing_pending_tasks (id, tenant_id, kind, run_at, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, kind)
            DO UPDATE SET
                id = EXCLUDED.id,
                run_at = EXCLUDED.run_at,
                payload = EXCLUDED.payload,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(task.kind.as_str())
        .bind(task.run_at)
        .bind(sqlx::types::Json(&task.job))
        .bind(task.created_at)
        .execute(&mut tx)
        .await
        .context("failed to record pending task")?;

        tx.commit().await?;
        previous.map(PendingTask::try_from).transpose()
    }

    async fn remove(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        let row = sqlx::query_as::<_, PendingTaskRow>(
            "DELETE FROM billing_pending_tasks WHERE tenant_id = $1 AND kind = $2 RETURNING *",
        )
        .bind(tenant_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to remove pending task")?;
        row.map(PendingTask::try_from).transpose()
    }

    async fn find(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        let row = sqlx::query_as::<_, PendingTaskRow>(
            "SELECT * FROM billing_pending_tasks WHERE tenant_id = $1 AND kind = $2",
        )
        .bind(tenant_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load pending task")?;
        row.map(PendingTask::try_from).transpose()
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PendingTask>> {
        let rows = sqlx::query_as::<_, PendingTaskRow>(
            r#"
            DELETE FROM billing_pending_tasks
            WHERE id IN (
                SELECT id FROM billing_pending_tasks
                WHERE run_at <= $1
                ORDER BY run_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to claim due tasks")?;
        rows.into_iter().map(PendingTask::try_from).collect()
    }
}
