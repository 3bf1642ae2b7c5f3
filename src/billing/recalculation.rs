use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::{TaskJob, TaskKind};
use super::scheduler::DeferredTasks;
use super::store::SubscriptionStore;
use super::usage::Pricing;
use crate::catalog::{BillableLesson, CatalogStore, VideoHosting};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecalcOutcome {
    NoSubscription,
    Inactive,
    InSync {
        amount_cents: i64,
    },
    SyncScheduled {
        stored_cents: i64,
        target_cents: i64,
        task: Uuid,
    },
}

/// Seconds of protected video; external links and unknown durations count as zero.
pub fn billable_seconds(lessons: &[BillableLesson]) -> u64 {
    lessons
        .iter()
        .filter(|lesson| lesson.hosting == VideoHosting::Protected)
        .filter_map(|lesson| lesson.duration_seconds)
        .map(|seconds| u64::try_from(seconds).unwrap_or(0))
        .fold(0, u64::saturating_add)
}

/// key: billing-recalculation -> converge stored amount to usage target
#[derive(Clone)]
pub struct Recalculator {
    subscriptions: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn CatalogStore>,
    tasks: DeferredTasks,
    pricing: Pricing,
}

impl Recalculator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn CatalogStore>,
        tasks: DeferredTasks,
        pricing: Pricing,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            tasks,
            pricing,
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    pub async fn usage_seconds(&self, tenant_id: Uuid) -> Result<u64> {
        let lessons = self.catalog.billable_lessons(tenant_id).await?;
        Ok(billable_seconds(&lessons))
    }

    /// Depends only on stored state, so concurrent or repeated calls converge on the same
    /// decision.
    pub async fn recalculate(&self, tenant_id: Uuid) -> Result<RecalcOutcome> {
        let Some(subscription) = self.subscriptions.find_by_tenant(tenant_id).await? else {
            debug!(%tenant_id, "no subscription; skipping recalculation");
            return Ok(RecalcOutcome::NoSubscription);
        };
        if !subscription.is_active() {
            debug!(%tenant_id, "subscription inactive; skipping recalculation");
            return Ok(RecalcOutcome::Inactive);
        }

        let seconds = self.usage_seconds(tenant_id).await?;
        let target_cents = self.pricing.amount(seconds);

        if target_cents == subscription.amount_cents {
            // A sync queued for an earlier target would now push a stale amount.
            if let Some(stale) = self.tasks.cancel(tenant_id, TaskKind::BillingSync).await? {
                info!(%tenant_id, task = %stale.id, "dropped stale billing sync");
            }
            return Ok(RecalcOutcome::InSync {
                amount_cents: target_cents,
            });
        }

        let scheduled = self
            .tasks
            .schedule(
                tenant_id,
                Duration::zero(),
                TaskJob::SyncAmount {
                    amount_cents: target_cents,
                },
            )
            .await?;
        info!(
            %tenant_id,
            usage_seconds = seconds,
            stored_cents = subscription.amount_cents,
            target_cents,
            "billing amount diverged; sync scheduled"
        );

        Ok(RecalcOutcome::SyncScheduled {
            stored_cents: subscription.amount_cents,
            target_cents,
            task: scheduled.handle.id,
        })
    }
}
