use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::adapters::PaymentGateway;
use super::models::{PendingTask, Subscription, TaskJob};
use super::scheduler::{TaskHandler, TaskRun};
use super::store::SubscriptionStore;
use crate::catalog::CatalogStore;

/// Attempts at recording a synced amount against a concurrently changing row.
const SAVE_ATTEMPTS: usize = 3;

/// key: billing-task-executor -> outbound sync + cleanup hand-off
#[derive(Clone)]
pub struct TaskExecutor {
    subscriptions: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn CatalogStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl TaskExecutor {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn CatalogStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            gateway,
        }
    }

    async fn sync_amount(&self, task: &PendingTask, amount_cents: i64) -> TaskRun {
        let tenant_id = task.tenant_id;
        let subscription = match self.subscriptions.find_by_tenant(tenant_id).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => return TaskRun::Skipped("subscription removed"),
            Err(err) => return TaskRun::Failed(format!("{err:#}")),
        };
        if !subscription.is_active() {
            return TaskRun::Skipped("subscription inactive");
        }
        if subscription.amount_cents == amount_cents {
            return TaskRun::Skipped("amount already in sync");
        }

        let external_id = subscription.external_subscription_id;
        if let Err(err) = self.gateway.update_amount(external_id, amount_cents).await {
            // No retry: the next usage change recomputes and reschedules.
            error!(
                ?err,
                %tenant_id,
                external_id,
                amount_cents,
                "failed to sync amount to gateway"
            );
            return TaskRun::Failed(err.to_string());
        }
        info!(%tenant_id, external_id, amount_cents, "synced amount to gateway");

        let mut current = subscription;
        for _ in 0..SAVE_ATTEMPTS {
            if current.external_subscription_id != external_id {
                warn!(%tenant_id, external_id, "subscription replaced while syncing; leaving amount");
                return TaskRun::Completed;
            }
            let next = Subscription {
                amount_cents,
                ..current.clone()
            };
            match self.subscriptions.compare_and_save(&next).await {
                Ok(Some(_)) => return TaskRun::Completed,
                Ok(None) => {}
                Err(err) => return TaskRun::Failed(format!("{err:#}")),
            }
            current = match self.subscriptions.find_by_tenant(tenant_id).await {
                Ok(Some(subscription)) => subscription,
                Ok(None) => return TaskRun::Completed,
                Err(err) => return TaskRun::Failed(format!("{err:#}")),
            };
        }
        TaskRun::Failed("could not record synced amount".to_string())
    }

    async fn cleanup(&self, task: &PendingTask) -> TaskRun {
        let tenant_id = task.tenant_id;
        match self.subscriptions.find_by_tenant(tenant_id).await {
            Ok(Some(subscription)) if subscription.is_active() => {
                return TaskRun::Skipped("tenant reactivated");
            }
            Ok(_) => {}
            Err(err) => return TaskRun::Failed(format!("{err:#}")),
        }

        match self.catalog.detach_protected_videos(tenant_id).await {
            Ok(detached) => {
                info!(%tenant_id, detached, "purged protected video assets after grace period");
                TaskRun::Completed
            }
            Err(err) => TaskRun::Failed(format!("{err:#}")),
        }
    }
}

#[async_trait]
impl TaskHandler for TaskExecutor {
    async fn run(&self, task: &PendingTask) -> TaskRun {
        match &task.job {
            TaskJob::SyncAmount { amount_cents } => self.sync_amount(task, *amount_cents).await,
            TaskJob::Cleanup => self.cleanup(task).await,
        }
    }
}
