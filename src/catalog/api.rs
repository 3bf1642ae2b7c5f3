use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Course, LessonChange, NewLesson, PropagationReport, Section, VideoAsset};
use crate::billing::BillingService;
use crate::error::AppResult;

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct DurationRequest {
    pub duration_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct AssetEnvelope {
    pub asset: VideoAsset,
    pub propagation: PropagationReport,
}

/// key: catalog-api -> gated catalog endpoints
pub async fn create_course(
    Extension(billing): Extension<BillingService>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<TitleRequest>,
) -> AppResult<(StatusCode, Json<Course>)> {
    let course = billing
        .catalog()
        .create_course(tenant_id, &payload.title)
        .await?;
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn delete_course(
    Extension(billing): Extension<BillingService>,
    Path(course_id): Path<Uuid>,
) -> AppResult<Json<PropagationReport>> {
    let report = billing.catalog().delete_course(course_id).await?;
    Ok(Json(report))
}

pub async fn create_section(
    Extension(billing): Extension<BillingService>,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<TitleRequest>,
) -> AppResult<(StatusCode, Json<Section>)> {
    let section = billing
        .catalog()
        .create_section(course_id, &payload.title)
        .await?;
    Ok((StatusCode::CREATED, Json(section)))
}

pub async fn create_lesson(
    Extension(billing): Extension<BillingService>,
    Path(section_id): Path<Uuid>,
    Json(payload): Json<NewLesson>,
) -> AppResult<(StatusCode, Json<LessonChange>)> {
    let change = billing.catalog().create_lesson(section_id, payload).await?;
    Ok((StatusCode::CREATED, Json(change)))
}

pub async fn delete_lesson(
    Extension(billing): Extension<BillingService>,
    Path(lesson_id): Path<Uuid>,
) -> AppResult<Json<LessonChange>> {
    let change = billing.catalog().delete_lesson(lesson_id).await?;
    Ok(Json(change))
}

pub async fn set_asset_duration(
    Extension(billing): Extension<BillingService>,
    Path(asset_id): Path<Uuid>,
    Json(payload): Json<DurationRequest>,
) -> AppResult<Json<AssetEnvelope>> {
    let (asset, propagation) = billing
        .catalog()
        .record_asset_duration(asset_id, payload.duration_seconds)
        .await?;
    Ok(Json(AssetEnvelope { asset, propagation }))
}
