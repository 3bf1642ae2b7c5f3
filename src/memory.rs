//! In-process backends for tests and database-less local runs.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::billing::{
    BillingBackends, NewSubscription, PendingTask, Subscription, SubscriptionStore, TaskKind,
    TaskRegistry, Tenant, TenantDirectory,
};
use crate::catalog::{
    BillableLesson, CatalogStore, Course, CourseRemoval, Lesson, Section, VideoAsset, VideoHosting,
};

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    rows: Mutex<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_by_tenant(&self, tenant_id: Uuid) -> Result<Option<Subscription>> {
        let rows = self.rows.lock().await;
        Ok(rows.values().find(|row| row.tenant_id == tenant_id).cloned())
    }

    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Subscription>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|row| row.external_subscription_id == external_id)
            .cloned())
    }

    async fn insert(&self, record: NewSubscription) -> Result<Option<Subscription>> {
        let mut rows = self.rows.lock().await;
        if rows.values().any(|row| row.tenant_id == record.tenant_id) {
            return Ok(None);
        }
        if rows
            .values()
            .any(|row| row.external_subscription_id == record.external_subscription_id)
        {
            return Ok(None);
        }
        let subscription = record.into_subscription(Utc::now());
        rows.insert(subscription.id, subscription.clone());
        Ok(Some(subscription))
    }

    async fn compare_and_save(&self, subscription: &Subscription) -> Result<Option<Subscription>> {
        let mut rows = self.rows.lock().await;
        if rows.values().any(|row| {
            row.id != subscription.id
                && row.external_subscription_id == subscription.external_subscription_id
        }) {
            return Ok(None);
        }
        let Some(stored) = rows.get_mut(&subscription.id) else {
            return Ok(None);
        };
        if stored.version != subscription.version {
            return Ok(None);
        }
        *stored = Subscription {
            version: subscription.version + 1,
            updated_at: Utc::now(),
            ..subscription.clone()
        };
        Ok(Some(stored.clone()))
    }

    async fn delete(&self, id: Uuid, expected_version: i64) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get(&id) {
            Some(stored) if stored.version == expected_version => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryTenantDirectory {
    tenants: DashMap<Uuid, Tenant>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, email: &str, name: &str) -> Tenant {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
        };
        self.tenants.insert(tenant.id, tenant.clone());
        tenant
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.tenants.get(&tenant_id).map(|entry| entry.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        Ok(self
            .tenants
            .iter()
            .find(|entry| entry.value().email.eq_ignore_ascii_case(email))
            .map(|entry| entry.value().clone()))
    }
}

/// Keyed by `(tenant, kind)`, so a second schedule overwrites the first.
#[derive(Default)]
pub struct InMemoryTaskRegistry {
    tasks: DashMap<(Uuid, TaskKind), PendingTask>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn replace(&self, task: &PendingTask) -> Result<Option<PendingTask>> {
        Ok(self
            .tasks
            .insert((task.tenant_id, task.kind), task.clone()))
    }

    async fn remove(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        Ok(self.tasks.remove(&(tenant_id, kind)).map(|(_, task)| task))
    }

    async fn find(&self, tenant_id: Uuid, kind: TaskKind) -> Result<Option<PendingTask>> {
        Ok(self
            .tasks
            .get(&(tenant_id, kind))
            .map(|entry| entry.value().clone()))
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<PendingTask>> {
        let mut due: Vec<PendingTask> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().run_at <= now)
            .map(|entry| entry.value().clone())
            .collect();
        due.sort_by_key(|task| task.run_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));

        let mut claimed = Vec::with_capacity(due.len());
        for task in due {
            // Only the handle that is still current may fire.
            if let Some((_, task)) = self
                .tasks
                .remove_if(&(task.tenant_id, task.kind), |_, current| current.id == task.id)
            {
                claimed.push(task);
            }
        }
        Ok(claimed)
    }
}

#[derive(Default)]
struct CatalogTables {
    courses: HashMap<Uuid, Course>,
    sections: HashMap<Uuid, Section>,
    lessons: HashMap<Uuid, Lesson>,
    assets: HashMap<Uuid, VideoAsset>,
}

#[derive(Default)]
pub struct InMemoryCatalog {
    tables: Mutex<CatalogTables>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn count_courses(&self, tenant_id: Uuid) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .courses
            .values()
            .filter(|course| course.tenant_id == tenant_id)
            .count() as u64)
    }

    async fn insert_course(&self, course: &Course) -> Result<()> {
        self.tables
            .lock()
            .await
            .courses
            .insert(course.id, course.clone());
        Ok(())
    }

    async fn find_course(&self, course_id: Uuid) -> Result<Option<Course>> {
        Ok(self.tables.lock().await.courses.get(&course_id).cloned())
    }

    async fn delete_course_tree(&self, course_id: Uuid) -> Result<Option<CourseRemoval>> {
        let mut tables = self.tables.lock().await;
        let Some(course) = tables.courses.remove(&course_id) else {
            return Ok(None);
        };
        let section_ids: Vec<Uuid> = tables
            .sections
            .values()
            .filter(|section| section.course_id == course_id)
            .map(|section| section.id)
            .collect();
        let sections: Vec<Section> = section_ids
            .iter()
            .filter_map(|id| tables.sections.remove(id))
            .collect();
        let lesson_ids: Vec<Uuid> = tables
            .lessons
            .values()
            .filter(|lesson| section_ids.contains(&lesson.section_id))
            .map(|lesson| lesson.id)
            .collect();
        let lessons: Vec<Lesson> = lesson_ids
            .iter()
            .filter_map(|id| tables.lessons.remove(id))
            .collect();
        Ok(Some(CourseRemoval::assemble(course, sections, lessons)))
    }

    async fn insert_section(&self, section: &Section) -> Result<()> {
        self.tables
            .lock()
            .await
            .sections
            .insert(section.id, section.clone());
        Ok(())
    }

    async fn find_section(&self, section_id: Uuid) -> Result<Option<Section>> {
        Ok(self.tables.lock().await.sections.get(&section_id).cloned())
    }

    async fn sections_of_course(&self, course_id: Uuid) -> Result<Vec<Section>> {
        let tables = self.tables.lock().await;
        let mut sections: Vec<Section> = tables
            .sections
            .values()
            .filter(|section| section.course_id == course_id)
            .cloned()
            .collect();
        sections.sort_by_key(|section| section.created_at);
        Ok(sections)
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<()> {
        self.tables
            .lock()
            .await
            .lessons
            .insert(lesson.id, lesson.clone());
        Ok(())
    }

    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>> {
        Ok(self.tables.lock().await.lessons.get(&lesson_id).cloned())
    }

    async fn lessons_of_section(&self, section_id: Uuid) -> Result<Vec<Lesson>> {
        let tables = self.tables.lock().await;
        let mut lessons: Vec<Lesson> = tables
            .lessons
            .values()
            .filter(|lesson| lesson.section_id == section_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|lesson| lesson.created_at);
        Ok(lessons)
    }

    async fn delete_lesson(&self, lesson_id: Uuid) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .lessons
            .remove(&lesson_id)
            .is_some())
    }

    async fn insert_video_asset(&self, asset: &VideoAsset) -> Result<()> {
        self.tables
            .lock()
            .await
            .assets
            .insert(asset.id, asset.clone());
        Ok(())
    }

    async fn set_asset_duration(
        &self,
        asset_id: Uuid,
        duration_seconds: i64,
    ) -> Result<Option<VideoAsset>> {
        let mut tables = self.tables.lock().await;
        Ok(tables.assets.get_mut(&asset_id).map(|asset| {
            asset.duration_seconds = Some(duration_seconds);
            asset.clone()
        }))
    }

    async fn billable_lessons(&self, tenant_id: Uuid) -> Result<Vec<BillableLesson>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .lessons
            .values()
            .filter(|lesson| lesson.tenant_id == tenant_id)
            .map(|lesson| BillableLesson {
                lesson_id: lesson.id,
                hosting: lesson.hosting,
                duration_seconds: lesson
                    .video_asset_id
                    .and_then(|asset_id| tables.assets.get(&asset_id))
                    .and_then(|asset| asset.duration_seconds),
            })
            .collect())
    }

    async fn detach_protected_videos(&self, tenant_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        for lesson in tables.lessons.values_mut() {
            if lesson.tenant_id == tenant_id && lesson.hosting == VideoHosting::Protected {
                lesson.hosting = VideoHosting::None;
                lesson.video_asset_id = None;
            }
        }
        let before = tables.assets.len();
        tables.assets.retain(|_, asset| asset.tenant_id != tenant_id);
        Ok((before - tables.assets.len()) as u64)
    }
}

/// Concrete handles kept alongside the trait objects so tests can seed and inspect them.
#[derive(Clone, Default)]
pub struct InMemoryBackends {
    pub subscriptions: Arc<InMemorySubscriptionStore>,
    pub tenants: Arc<InMemoryTenantDirectory>,
    pub tasks: Arc<InMemoryTaskRegistry>,
    pub catalog: Arc<InMemoryCatalog>,
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(&self) -> BillingBackends {
        BillingBackends {
            subscriptions: self.subscriptions.clone(),
            tenants: self.tenants.clone(),
            tasks: self.tasks.clone(),
            catalog: self.catalog.clone(),
        }
    }
}
