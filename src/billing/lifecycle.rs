use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{GatewayEvent, IgnoredTrigger, LifecycleTrigger, ParsedEvent, SubscriptionData};
use super::models::{NewSubscription, Subscription, SubscriptionStatus, TaskJob, TaskKind};
use super::recalculation::Recalculator;
use super::scheduler::DeferredTasks;
use super::store::{SubscriptionStore, TenantDirectory};

/// Read-modify-write attempts before a contended transition is given up.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub trigger: LifecycleTrigger,
    pub tenant_id: Uuid,
    pub external_id: i64,
    pub from: Option<SubscriptionStatus>,
    /// `None` once the subscription has been deleted.
    pub to: Option<SubscriptionStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingSubscriptionData,
    MissingClientEmail,
    UnknownTenant { email: String },
    UnknownSubscription { external_id: i64 },
    AlreadyApplied,
    Contended,
    /// The gateway's next billing date is older than the stored period end.
    StalePeriod {
        current_period_end: DateTime<Utc>,
        next_billing: DateTime<Utc>,
    },
    /// A creation names a gateway subscription another tenant already owns.
    ExternalIdInUse { external_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "trigger", rename_all = "snake_case")]
pub enum IgnoreReason {
    Notification(IgnoredTrigger),
    UnknownTrigger(String),
    /// Body did not decode as a gateway event.
    MalformedPayload,
}

/// key: billing-webhook-outcome -> expected paths are values, not errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied(Transition),
    Ignored(IgnoreReason),
    Skipped(SkipReason),
}

enum Effect {
    Save(Subscription),
    Delete,
    Skip(SkipReason),
}

/// The period only moves forward: an older gateway date marks the event stale and the fallback
/// never shortens the stored period.
fn advanced_period(
    current: &Subscription,
    data: &SubscriptionData,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SkipReason> {
    match data.parsed_next_billing() {
        Some(next_billing) if next_billing < current.current_period_end => {
            Err(SkipReason::StalePeriod {
                current_period_end: current.current_period_end,
                next_billing,
            })
        }
        Some(next_billing) => Ok(next_billing),
        None => Ok(data
            .next_billing_or_fallback(now)
            .max(current.current_period_end)),
    }
}

/// Applies the transition table to `current`. Pure apart from the fallback-date warning.
fn plan_transition(
    current: &Subscription,
    trigger: LifecycleTrigger,
    data: &SubscriptionData,
    now: DateTime<Utc>,
) -> Effect {
    let mut next = current.clone();
    match trigger {
        LifecycleTrigger::Canceled => return Effect::Delete,
        LifecycleTrigger::Created => {
            return match resubscribe(current, data, now) {
                Ok(next) => Effect::Save(next),
                Err(reason) => Effect::Skip(reason),
            };
        }
        LifecycleTrigger::Suspended
        | LifecycleTrigger::ChargeFailed
        | LifecycleTrigger::OverdueChargeFailed => {
            next.status = SubscriptionStatus::Inactive;
        }
        LifecycleTrigger::Resumed | LifecycleTrigger::ChargeSucceeded => {
            let period_end = match advanced_period(current, data, now) {
                Ok(period_end) => period_end,
                Err(reason) => return Effect::Skip(reason),
            };
            next.status = SubscriptionStatus::Active;
            next.last_renewal_date = now;
            next.current_period_end = period_end;
        }
        LifecycleTrigger::Updated => {
            let period_end = match advanced_period(current, data, now) {
                Ok(period_end) => period_end,
                Err(reason) => return Effect::Skip(reason),
            };
            if let Some(state) = data.state.as_deref() {
                next.status = SubscriptionStatus::from_gateway_state(state);
            }
            next.current_period_end = period_end;
            if let Some(amount) = data.amount_cents {
                next.amount_cents = amount;
            }
        }
    }
    Effect::Save(next)
}

/// A creation event for a tenant that already has a row reuses it. A repeated creation of the
/// same gateway subscription must not rewind its period.
fn resubscribe(
    current: &Subscription,
    data: &SubscriptionData,
    now: DateTime<Utc>,
) -> Result<Subscription, SkipReason> {
    let current_period_end = if data.id == current.external_subscription_id {
        advanced_period(current, data, now)?
    } else {
        data.next_billing_or_fallback(now)
    };
    Ok(Subscription {
        status: SubscriptionStatus::Active,
        last_renewal_date: now,
        current_period_end,
        amount_cents: data.amount_cents.unwrap_or(current.amount_cents),
        external_subscription_id: data.id,
        ..current.clone()
    })
}

/// key: billing-lifecycle -> webhook state machine
#[derive(Clone)]
pub struct LifecycleEngine {
    subscriptions: Arc<dyn SubscriptionStore>,
    tenants: Arc<dyn TenantDirectory>,
    tasks: DeferredTasks,
    recalculator: Recalculator,
    cleanup_grace: Duration,
}

impl LifecycleEngine {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        tenants: Arc<dyn TenantDirectory>,
        tasks: DeferredTasks,
        recalculator: Recalculator,
        cleanup_grace: Duration,
    ) -> Self {
        Self {
            subscriptions,
            tenants,
            tasks,
            recalculator,
            cleanup_grace,
        }
    }

    pub async fn apply(&self, event: GatewayEvent) -> Result<WebhookOutcome> {
        self.apply_at(event, Utc::now()).await
    }

    /// Never fails for anything the gateway sent; `Err` means the store is unavailable.
    pub async fn apply_at(&self, event: GatewayEvent, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        let transaction_id = event.transaction_id;
        match event.parse() {
            ParsedEvent::Unknown(raw) => {
                warn!(trigger = %raw, "unrecognized gateway trigger; dropping event");
                Ok(WebhookOutcome::Ignored(IgnoreReason::UnknownTrigger(raw)))
            }
            ParsedEvent::Ignored(kind) => {
                debug!(?kind, "acknowledged gateway notification");
                Ok(WebhookOutcome::Ignored(IgnoreReason::Notification(kind)))
            }
            ParsedEvent::Incomplete(trigger) => {
                warn!(?trigger, "gateway event carried no subscription data; skipping");
                Ok(WebhookOutcome::Skipped(SkipReason::MissingSubscriptionData))
            }
            ParsedEvent::Lifecycle { trigger, data } => {
                debug!(?trigger, external_id = data.id, ?transaction_id, "applying gateway event");
                match trigger {
                    LifecycleTrigger::Created => self.apply_created(data, now).await,
                    _ => self.apply_by_external_id(trigger, data, now).await,
                }
            }
        }
    }

    async fn apply_created(&self, data: SubscriptionData, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        let Some(email) = data.client_email() else {
            warn!(external_id = data.id, "subscription created without client email; skipping");
            return Ok(WebhookOutcome::Skipped(SkipReason::MissingClientEmail));
        };
        let Some(tenant) = self.tenants.find_by_email(email).await? else {
            warn!(external_id = data.id, email, "no tenant matches subscription email; skipping");
            return Ok(WebhookOutcome::Skipped(SkipReason::UnknownTenant {
                email: email.to_string(),
            }));
        };

        for _ in 0..MAX_ATTEMPTS {
            if let Some(owner) = self.subscriptions.find_by_external_id(data.id).await? {
                if owner.tenant_id != tenant.id {
                    warn!(
                        external_id = data.id,
                        tenant_id = %tenant.id,
                        owner = %owner.tenant_id,
                        "gateway subscription already belongs to another tenant; skipping"
                    );
                    return Ok(WebhookOutcome::Skipped(SkipReason::ExternalIdInUse {
                        external_id: data.id,
                    }));
                }
            }

            match self.subscriptions.find_by_tenant(tenant.id).await? {
                Some(current) => {
                    let next = match resubscribe(&current, &data, now) {
                        Ok(next) => next,
                        Err(reason) => {
                            warn!(
                                tenant_id = %tenant.id,
                                external_id = data.id,
                                ?reason,
                                "stale creation event; skipping"
                            );
                            return Ok(WebhookOutcome::Skipped(reason));
                        }
                    };
                    if next.same_billing_state(&current) {
                        debug!(tenant_id = %tenant.id, external_id = data.id, "creation already applied");
                        return Ok(WebhookOutcome::Skipped(SkipReason::AlreadyApplied));
                    }
                    let Some(saved) = self.subscriptions.compare_and_save(&next).await? else {
                        continue;
                    };
                    info!(
                        tenant_id = %tenant.id,
                        external_id = saved.external_subscription_id,
                        previous_external_id = current.external_subscription_id,
                        "tenant resubscribed"
                    );
                    self.after_save(LifecycleTrigger::Created, Some(&current), &saved)
                        .await;
                    return Ok(applied(LifecycleTrigger::Created, Some(&current), Some(&saved)));
                }
                None => {
                    let record = NewSubscription {
                        tenant_id: tenant.id,
                        status: SubscriptionStatus::Active,
                        external_subscription_id: data.id,
                        amount_cents: data.amount_cents.unwrap_or(0),
                        last_renewal_date: now,
                        current_period_end: data.next_billing_or_fallback(now),
                    };
                    let Some(saved) = self.subscriptions.insert(record).await? else {
                        continue;
                    };
                    info!(
                        tenant_id = %tenant.id,
                        external_id = saved.external_subscription_id,
                        amount_cents = saved.amount_cents,
                        "subscription created"
                    );
                    self.after_save(LifecycleTrigger::Created, None, &saved).await;
                    return Ok(applied(LifecycleTrigger::Created, None, Some(&saved)));
                }
            }
        }

        warn!(tenant_id = %tenant.id, external_id = data.id, "subscription creation contended; giving up");
        Ok(WebhookOutcome::Skipped(SkipReason::Contended))
    }

    async fn apply_by_external_id(
        &self,
        trigger: LifecycleTrigger,
        data: SubscriptionData,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        for _ in 0..MAX_ATTEMPTS {
            let Some(current) = self.subscriptions.find_by_external_id(data.id).await? else {
                warn!(?trigger, external_id = data.id, "no subscription for external id; skipping");
                return Ok(WebhookOutcome::Skipped(SkipReason::UnknownSubscription {
                    external_id: data.id,
                }));
            };

            match plan_transition(&current, trigger, &data, now) {
                Effect::Skip(reason) => {
                    warn!(?trigger, external_id = data.id, ?reason, "stale gateway event; skipping");
                    return Ok(WebhookOutcome::Skipped(reason));
                }
                Effect::Delete => {
                    if !self.subscriptions.delete(current.id, current.version).await? {
                        continue;
                    }
                    info!(
                        tenant_id = %current.tenant_id,
                        external_id = current.external_subscription_id,
                        "subscription canceled and removed"
                    );
                    self.after_delete(&current).await;
                    return Ok(applied(trigger, Some(&current), None));
                }
                Effect::Save(next) => {
                    if next.same_billing_state(&current) {
                        debug!(?trigger, external_id = data.id, "transition already applied");
                        return Ok(WebhookOutcome::Skipped(SkipReason::AlreadyApplied));
                    }
                    let Some(saved) = self.subscriptions.compare_and_save(&next).await? else {
                        continue;
                    };
                    info!(
                        ?trigger,
                        tenant_id = %saved.tenant_id,
                        external_id = saved.external_subscription_id,
                        from = %current.status,
                        to = %saved.status,
                        "subscription transitioned"
                    );
                    self.after_save(trigger, Some(&current), &saved).await;
                    return Ok(applied(trigger, Some(&current), Some(&saved)));
                }
            }
        }

        warn!(?trigger, external_id = data.id, "subscription transition contended; giving up");
        Ok(WebhookOutcome::Skipped(SkipReason::Contended))
    }

    /// Runs after the row is committed. Failures are logged and not returned.
    async fn after_save(
        &self,
        trigger: LifecycleTrigger,
        previous: Option<&Subscription>,
        saved: &Subscription,
    ) {
        let tenant_id = saved.tenant_id;
        let was_active = previous.map(Subscription::is_active).unwrap_or(false);

        if saved.is_active() && (!was_active || trigger == LifecycleTrigger::Created) {
            if let Err(err) = self.tasks.cancel(tenant_id, TaskKind::Cleanup).await {
                error!(?err, %tenant_id, "failed to cancel pending cleanup");
            }
        }

        if was_active && !saved.is_active() {
            self.schedule_cleanup(tenant_id).await;
            if let Err(err) = self.tasks.cancel(tenant_id, TaskKind::BillingSync).await {
                error!(?err, %tenant_id, "failed to cancel pending billing sync");
            }
        }

        if saved.is_active() {
            if let Err(err) = self.recalculator.recalculate(tenant_id).await {
                error!(?err, %tenant_id, "billing recalculation after transition failed");
            }
        }
    }

    async fn after_delete(&self, deleted: &Subscription) {
        let tenant_id = deleted.tenant_id;
        if let Err(err) = self.tasks.cancel(tenant_id, TaskKind::BillingSync).await {
            error!(?err, %tenant_id, "failed to cancel pending billing sync");
        }
        if deleted.is_active() {
            self.schedule_cleanup(tenant_id).await;
        }
    }

    async fn schedule_cleanup(&self, tenant_id: Uuid) {
        if let Err(err) = self
            .tasks
            .schedule(tenant_id, self.cleanup_grace, TaskJob::Cleanup)
            .await
        {
            error!(?err, %tenant_id, "failed to schedule cleanup");
        }
    }
}

fn applied(
    trigger: LifecycleTrigger,
    previous: Option<&Subscription>,
    saved: Option<&Subscription>,
) -> WebhookOutcome {
    let reference = saved.or(previous);
    WebhookOutcome::Applied(Transition {
        trigger,
        tenant_id: reference.map(|s| s.tenant_id).unwrap_or_default(),
        external_id: reference.map(|s| s.external_subscription_id).unwrap_or_default(),
        from: previous.map(|s| s.status),
        to: saved.map(|s| s.status),
    })
}
