use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use super::adapters::{GatewayError, PaymentGateway, TransactionHistory};
use super::executor::TaskExecutor;
use super::lifecycle::LifecycleEngine;
use super::limits::PlanGate;
use super::models::Subscription;
use super::recalculation::Recalculator;
use super::scheduler::DeferredTasks;
use super::store::{
    PgSubscriptionStore, PgTaskRegistry, PgTenantDirectory, SubscriptionStore, TaskRegistry,
    TenantDirectory,
};
use crate::catalog::{CatalogService, CatalogStore, ChangePropagator, PgCatalogStore};
use crate::config::BillingSettings;

/// Storage the engine runs against.
#[derive(Clone)]
pub struct BillingBackends {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub tasks: Arc<dyn TaskRegistry>,
    pub catalog: Arc<dyn CatalogStore>,
}

impl BillingBackends {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            subscriptions: Arc::new(PgSubscriptionStore::new(pool.clone())),
            tenants: Arc::new(PgTenantDirectory::new(pool.clone())),
            tasks: Arc::new(PgTaskRegistry::new(pool.clone())),
            catalog: Arc::new(PgCatalogStore::new(pool)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionsError {
    #[error("tenant has no subscription")]
    NoSubscription,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// key: billing-service -> wiring for the webhook, catalog and task paths
#[derive(Clone)]
pub struct BillingService {
    subscriptions: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    tasks: DeferredTasks,
    recalculator: Recalculator,
    lifecycle: LifecycleEngine,
    gate: PlanGate,
    catalog: CatalogService,
    executor: TaskExecutor,
    settings: Arc<BillingSettings>,
}

impl BillingService {
    pub fn new(
        backends: BillingBackends,
        gateway: Arc<dyn PaymentGateway>,
        settings: BillingSettings,
    ) -> Self {
        let BillingBackends {
            subscriptions,
            tenants,
            tasks,
            catalog,
        } = backends;

        let tasks = DeferredTasks::new(tasks);
        let recalculator = Recalculator::new(
            subscriptions.clone(),
            catalog.clone(),
            tasks.clone(),
            settings.pricing,
        );
        let lifecycle = LifecycleEngine::new(
            subscriptions.clone(),
            tenants,
            tasks.clone(),
            recalculator.clone(),
            settings.cleanup_grace,
        );
        let gate = PlanGate::new(subscriptions.clone(), catalog.clone(), settings.limits);
        let propagator = ChangePropagator::new(recalculator.clone());
        let catalog_service = CatalogService::new(catalog.clone(), gate.clone(), propagator);
        let executor = TaskExecutor::new(subscriptions.clone(), catalog, gateway.clone());

        Self {
            subscriptions,
            gateway,
            tasks,
            recalculator,
            lifecycle,
            gate,
            catalog: catalog_service,
            executor,
            settings: Arc::new(settings),
        }
    }

    pub fn lifecycle(&self) -> &LifecycleEngine {
        &self.lifecycle
    }

    pub fn recalculator(&self) -> &Recalculator {
        &self.recalculator
    }

    pub fn gate(&self) -> &PlanGate {
        &self.gate
    }

    pub fn tasks(&self) -> &DeferredTasks {
        &self.tasks
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    pub fn executor(&self) -> Arc<TaskExecutor> {
        Arc::new(self.executor.clone())
    }

    pub fn settings(&self) -> &BillingSettings {
        &self.settings
    }

    pub async fn subscription(&self, tenant_id: Uuid) -> anyhow::Result<Option<Subscription>> {
        self.subscriptions.find_by_tenant(tenant_id).await
    }

    /// Read-only pass-through to the gateway's transaction log for the tenant's subscription.
    pub async fn transactions(
        &self,
        tenant_id: Uuid,
    ) -> Result<TransactionHistory, TransactionsError> {
        let subscription = self
            .subscriptions
            .find_by_tenant(tenant_id)
            .await?
            .ok_or(TransactionsError::NoSubscription)?;
        Ok(self
            .gateway
            .list_transactions(subscription.external_subscription_id)
            .await?)
    }
}
