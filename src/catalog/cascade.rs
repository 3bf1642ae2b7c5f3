use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{CourseRemoval, Lesson, SectionRemoval, VideoAsset, VideoHosting};
use crate::billing::{RecalcOutcome, Recalculator};

/// Mutation notifications raised by the catalog after a write has been committed. Deletes carry
/// the rows the store already removed together with their parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    LessonCreated(Lesson),
    LessonDeleted(Lesson),
    AssetDurationChanged(VideoAsset),
    CourseDeleted(CourseRemoval),
    SectionDeleted(SectionRemoval),
}

impl CatalogChange {
    fn tenant_id(&self) -> Uuid {
        match self {
            CatalogChange::LessonCreated(lesson) | CatalogChange::LessonDeleted(lesson) => {
                lesson.tenant_id
            }
            CatalogChange::AssetDurationChanged(asset) => asset.tenant_id,
            CatalogChange::CourseDeleted(removal) => removal.course.tenant_id,
            CatalogChange::SectionDeleted(removal) => removal.section.tenant_id,
        }
    }

    fn affects_usage(&self) -> bool {
        match self {
            CatalogChange::LessonCreated(lesson) | CatalogChange::LessonDeleted(lesson) => {
                lesson.hosting == VideoHosting::Protected
            }
            CatalogChange::AssetDurationChanged(_) => true,
            CatalogChange::CourseDeleted(_) | CatalogChange::SectionDeleted(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    pub sections_deleted: usize,
    pub lessons_deleted: usize,
    pub recalculated: Vec<TenantRecalc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantRecalc {
    pub tenant_id: Uuid,
    pub outcome: RecalcOutcome,
}

/// key: catalog-cascade -> child deletes + billing recalculation
#[derive(Clone)]
pub struct ChangePropagator {
    recalculator: Recalculator,
}

impl ChangePropagator {
    pub fn new(recalculator: Recalculator) -> Self {
        Self { recalculator }
    }

    /// Drains `change` and everything it cascades into, then recalculates each touched tenant
    /// once. Recalculation failures are logged; the catalog write has already been committed.
    pub async fn propagate(&self, change: CatalogChange) -> PropagationReport {
        let mut report = PropagationReport::default();
        let mut pending = VecDeque::from([change]);
        let mut tenants = BTreeSet::new();

        while let Some(change) = pending.pop_front() {
            if change.affects_usage() {
                tenants.insert(change.tenant_id());
            }
            match change {
                CatalogChange::CourseDeleted(removal) => {
                    for section in removal.sections {
                        report.sections_deleted += 1;
                        pending.push_back(CatalogChange::SectionDeleted(section));
                    }
                }
                CatalogChange::SectionDeleted(removal) => {
                    for lesson in removal.lessons {
                        report.lessons_deleted += 1;
                        pending.push_back(CatalogChange::LessonDeleted(lesson));
                    }
                }
                CatalogChange::LessonCreated(_)
                | CatalogChange::LessonDeleted(_)
                | CatalogChange::AssetDurationChanged(_) => {}
            }
        }

        for tenant_id in tenants {
            match self.recalculator.recalculate(tenant_id).await {
                Ok(outcome) => {
                    debug!(%tenant_id, ?outcome, "recalculated after catalog change");
                    report.recalculated.push(TenantRecalc { tenant_id, outcome });
                }
                Err(err) => warn!(?err, %tenant_id, "billing recalculation failed"),
            }
        }

        report
    }
}
