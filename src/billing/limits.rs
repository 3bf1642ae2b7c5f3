use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::models::Plan;
use super::store::SubscriptionStore;
use crate::catalog::CatalogStore;

/// key: billing-limits -> capabilities gated per plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateCourse,
    ProtectedHosting,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::CreateCourse => f.write_str("course creation"),
            Capability::ProtectedHosting => f.write_str("protected video hosting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// `None` means unbounded.
    pub max_courses: Option<u32>,
    pub protected_hosting: bool,
}

/// Limits for both plans. Only the free plan ceiling is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimitsTable {
    free_max_courses: u32,
}

impl PlanLimitsTable {
    pub const fn new(free_max_courses: u32) -> Self {
        Self { free_max_courses }
    }

    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => PlanLimits {
                max_courses: Some(self.free_max_courses),
                protected_hosting: false,
            },
            Plan::Paid => PlanLimits {
                max_courses: None,
                protected_hosting: true,
            },
        }
    }
}

/// Rejection surfaced to the caller of a mutating catalog operation.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{capability} limit reached on the {plan} plan")]
pub struct LimitExceeded {
    pub tenant_id: Uuid,
    pub plan: Plan,
    pub capability: Capability,
    pub limit: Option<u32>,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// key: billing-plan-gate -> read-only advisory checks
#[derive(Clone)]
pub struct PlanGate {
    subscriptions: Arc<dyn SubscriptionStore>,
    catalog: Arc<dyn CatalogStore>,
    table: PlanLimitsTable,
}

impl PlanGate {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        catalog: Arc<dyn CatalogStore>,
        table: PlanLimitsTable,
    ) -> Self {
        Self {
            subscriptions,
            catalog,
            table,
        }
    }

    pub async fn plan_for(&self, tenant_id: Uuid) -> anyhow::Result<Plan> {
        let subscription = self.subscriptions.find_by_tenant(tenant_id).await?;
        Ok(match subscription {
            Some(subscription) if subscription.is_active() => Plan::Paid,
            _ => Plan::Free,
        })
    }

    pub fn limits_for(&self, plan: Plan) -> PlanLimits {
        self.table.limits_for(plan)
    }

    pub async fn assert_within_limit(
        &self,
        tenant_id: Uuid,
        capability: Capability,
    ) -> Result<(), GateError> {
        let plan = self.plan_for(tenant_id).await?;
        let limits = self.limits_for(plan);
        let allowed = match capability {
            Capability::CreateCourse => match limits.max_courses {
                None => true,
                Some(max) => self.catalog.count_courses(tenant_id).await? < u64::from(max),
            },
            Capability::ProtectedHosting => limits.protected_hosting,
        };

        if allowed {
            return Ok(());
        }

        tracing::info!(%tenant_id, %plan, ?capability, "plan limit reached");
        Err(LimitExceeded {
            tenant_id,
            plan,
            capability,
            limit: match capability {
                Capability::CreateCourse => limits.max_courses,
                Capability::ProtectedHosting => None,
            },
        }
        .into())
    }
}
