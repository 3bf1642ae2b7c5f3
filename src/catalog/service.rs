use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::cascade::{CatalogChange, ChangePropagator, PropagationReport};
use super::models::{Course, Lesson, NewLesson, Section, VideoAsset, VideoHosting};
use super::store::CatalogStore;
use crate::billing::{Capability, GateError, LimitExceeded, PlanGate};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<GateError> for CatalogError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::LimitExceeded(limit) => CatalogError::LimitExceeded(limit),
            GateError::Store(err) => CatalogError::Store(err),
        }
    }
}

/// Result of a lesson mutation together with what it set off.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LessonChange {
    pub lesson: Lesson,
    pub propagation: PropagationReport,
}

/// key: catalog-service -> gated catalog writes
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    gate: PlanGate,
    propagator: ChangePropagator,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CatalogStore>, gate: PlanGate, propagator: ChangePropagator) -> Self {
        Self {
            store,
            gate,
            propagator,
        }
    }

    pub async fn create_course(&self, tenant_id: Uuid, title: &str) -> Result<Course, CatalogError> {
        let title = required_title(title)?;
        self.gate
            .assert_within_limit(tenant_id, Capability::CreateCourse)
            .await?;

        let course = Course {
            id: Uuid::new_v4(),
            tenant_id,
            title,
            created_at: Utc::now(),
        };
        self.store.insert_course(&course).await?;
        info!(%tenant_id, course_id = %course.id, "course created");
        Ok(course)
    }

    pub async fn create_section(&self, course_id: Uuid, title: &str) -> Result<Section, CatalogError> {
        let title = required_title(title)?;
        let course = self
            .store
            .find_course(course_id)
            .await?
            .ok_or(CatalogError::NotFound("course"))?;

        let section = Section {
            id: Uuid::new_v4(),
            course_id: course.id,
            tenant_id: course.tenant_id,
            title,
            created_at: Utc::now(),
        };
        self.store.insert_section(&section).await?;
        Ok(section)
    }

    /// Protected lessons need a plan that allows protected hosting and start with an asset of
    /// unknown duration.
    pub async fn create_lesson(
        &self,
        section_id: Uuid,
        request: NewLesson,
    ) -> Result<LessonChange, CatalogError> {
        let title = required_title(&request.title)?;
        let section = self
            .store
            .find_section(section_id)
            .await?
            .ok_or(CatalogError::NotFound("section"))?;
        let tenant_id = section.tenant_id;
        let now = Utc::now();

        let (external_url, video_asset_id) = match request.hosting {
            VideoHosting::None => (None, None),
            VideoHosting::External => {
                let url = request
                    .external_url
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| {
                        CatalogError::Invalid("external lessons need an external_url".to_string())
                    })?;
                (Some(url), None)
            }
            VideoHosting::Protected => {
                self.gate
                    .assert_within_limit(tenant_id, Capability::ProtectedHosting)
                    .await?;
                let asset = VideoAsset {
                    id: Uuid::new_v4(),
                    tenant_id,
                    duration_seconds: None,
                    created_at: now,
                };
                self.store.insert_video_asset(&asset).await?;
                (None, Some(asset.id))
            }
        };

        let lesson = Lesson {
            id: Uuid::new_v4(),
            section_id: section.id,
            tenant_id,
            title,
            hosting: request.hosting,
            external_url,
            video_asset_id,
            created_at: now,
        };
        self.store.insert_lesson(&lesson).await?;
        info!(%tenant_id, lesson_id = %lesson.id, hosting = %lesson.hosting, "lesson created");

        let propagation = self
            .propagator
            .propagate(CatalogChange::LessonCreated(lesson.clone()))
            .await;
        Ok(LessonChange {
            lesson,
            propagation,
        })
    }

    pub async fn delete_lesson(&self, lesson_id: Uuid) -> Result<LessonChange, CatalogError> {
        let lesson = self
            .store
            .find_lesson(lesson_id)
            .await?
            .ok_or(CatalogError::NotFound("lesson"))?;
        if !self.store.delete_lesson(lesson.id).await? {
            return Err(CatalogError::NotFound("lesson"));
        }

        let propagation = self
            .propagator
            .propagate(CatalogChange::LessonDeleted(lesson.clone()))
            .await;
        Ok(LessonChange {
            lesson,
            propagation,
        })
    }

    /// Removes the course with its sections and lessons in one store call, then notifies billing
    /// about every removed lesson.
    pub async fn delete_course(&self, course_id: Uuid) -> Result<PropagationReport, CatalogError> {
        let removal = self
            .store
            .delete_course_tree(course_id)
            .await?
            .ok_or(CatalogError::NotFound("course"))?;
        info!(
            tenant_id = %removal.course.tenant_id,
            %course_id,
            sections = removal.sections.len(),
            lessons = removal.lessons().count(),
            "course deleted"
        );

        Ok(self
            .propagator
            .propagate(CatalogChange::CourseDeleted(removal))
            .await)
    }

    pub async fn record_asset_duration(
        &self,
        asset_id: Uuid,
        duration_seconds: i64,
    ) -> Result<(VideoAsset, PropagationReport), CatalogError> {
        if duration_seconds < 0 {
            return Err(CatalogError::Invalid(
                "duration_seconds must not be negative".to_string(),
            ));
        }
        let asset = self
            .store
            .set_asset_duration(asset_id, duration_seconds)
            .await?
            .ok_or(CatalogError::NotFound("video asset"))?;

        let propagation = self
            .propagator
            .propagate(CatalogChange::AssetDurationChanged(asset.clone()))
            .await;
        Ok((asset, propagation))
    }
}

fn required_title(title: &str) -> Result<String, CatalogError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CatalogError::Invalid("title must not be empty".to_string()));
    }
    Ok(title.to_string())
}
