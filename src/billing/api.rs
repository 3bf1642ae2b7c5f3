use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use super::{
    BillingService, Plan, PlanLimits, RecalcOutcome, Subscription, TransactionHistory,
};
use crate::error::AppResult;

#[derive(Debug, Serialize)]
pub struct PlanEnvelope {
    pub tenant_id: Uuid,
    pub plan: Plan,
    pub limits: PlanLimits,
}

/// key: billing-api -> tenant billing endpoints
pub async fn get_subscription(
    Extension(billing): Extension<BillingService>,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<Option<Subscription>>> {
    let subscription = billing.subscription(tenant_id).await?;
    Ok(Json(subscription))
}

pub async fn get_plan(
    Extension(billing): Extension<BillingService>,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<PlanEnvelope>> {
    let plan = billing.gate().plan_for(tenant_id).await?;
    Ok(Json(PlanEnvelope {
        tenant_id,
        plan,
        limits: billing.gate().limits_for(plan),
    }))
}

pub async fn recalculate(
    Extension(billing): Extension<BillingService>,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<RecalcOutcome>> {
    let outcome = billing.recalculator().recalculate(tenant_id).await?;
    Ok(Json(outcome))
}

pub async fn list_transactions(
    Extension(billing): Extension<BillingService>,
    Path(tenant_id): Path<Uuid>,
) -> AppResult<Json<TransactionHistory>> {
    let history = billing.transactions(tenant_id).await?;
    Ok(Json(history))
}
