pub mod adapters;
pub mod api;
pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod limits;
pub mod models;
pub mod recalculation;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod usage;

pub use adapters::{
    CardOnFile, GatewayError, HttpGateway, PaymentGateway, TransactionHistory, TransactionSummary,
};
pub use events::{GatewayEvent, LifecycleTrigger, ParsedEvent, SubscriptionData, Trigger};
pub use executor::TaskExecutor;
pub use lifecycle::{IgnoreReason, LifecycleEngine, SkipReason, Transition, WebhookOutcome};
pub use limits::{Capability, GateError, LimitExceeded, PlanGate, PlanLimits, PlanLimitsTable};
pub use models::{
    NewSubscription, PendingTask, Plan, Subscription, SubscriptionStatus, TaskJob, TaskKind,
    Tenant,
};
pub use recalculation::{RecalcOutcome, Recalculator};
pub use scheduler::{
    process_due, spawn_task_worker, DeferredTasks, Scheduled, TaskHandler, TaskRun,
};
pub use service::{BillingBackends, BillingService, TransactionsError};
pub use store::{
    PgSubscriptionStore, PgTaskRegistry, PgTenantDirectory, SubscriptionStore, TaskRegistry,
    TenantDirectory,
};
pub use usage::Pricing;
