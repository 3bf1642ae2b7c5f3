use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{
    BillableLesson, BillableLessonRow, Course, CourseRemoval, Lesson, LessonRow, Section,
    VideoAsset,
};

/// key: catalog-store -> courses, sections, lessons, video assets
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn count_courses(&self, tenant_id: Uuid) -> Result<u64>;
    async fn insert_course(&self, course: &Course) -> Result<()>;
    async fn find_course(&self, course_id: Uuid) -> Result<Option<Course>>;
    /// Deletes the course, its sections and their lessons atomically. Returns what was removed,
    /// or `None` when the course does not exist.
    async fn delete_course_tree(&self, course_id: Uuid) -> Result<Option<CourseRemoval>>;

    async fn insert_section(&self, section: &Section) -> Result<()>;
    async fn find_section(&self, section_id: Uuid) -> Result<Option<Section>>;
    async fn sections_of_course(&self, course_id: Uuid) -> Result<Vec<Section>>;

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<()>;
    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>>;
    async fn lessons_of_section(&self, section_id: Uuid) -> Result<Vec<Lesson>>;
    async fn delete_lesson(&self, lesson_id: Uuid) -> Result<bool>;

    async fn insert_video_asset(&self, asset: &VideoAsset) -> Result<()>;
    async fn set_asset_duration(
        &self,
        asset_id: Uuid,
        duration_seconds: i64,
    ) -> Result<Option<VideoAsset>>;

    /// Every lesson of the tenant with the duration of its protected asset, if known.
    async fn billable_lessons(&self, tenant_id: Uuid) -> Result<Vec<BillableLesson>>;
    /// Drops the tenant's protected assets and unlinks them from lessons. Returns the number of
    /// assets removed.
    async fn detach_protected_videos(&self, tenant_id: Uuid) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn count_courses(&self, tenant_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to count courses")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn insert_course(&self, course: &Course) -> Result<()> {
        sqlx::query("INSERT INTO courses (id, tenant_id, title, created_at) VALUES ($1, $2, $3, $4)")
            .bind(course.id)
            .bind(course.tenant_id)
            .bind(&course.title)
            .bind(course.created_at)
            .execute(&self.pool)
            .await
            .context("failed to insert course")?;
        Ok(())
    }

    async fn find_course(&self, course_id: Uuid) -> Result<Option<Course>> {
        sqlx::query_as::<_, Course>("SELECT * FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load course")
    }

    async fn delete_course_tree(&self, course_id: Uuid) -> Result<Option<CourseRemoval>> {
        let mut tx = self.pool.begin().await?;
        let Some(course) =
            sqlx::query_as::<_, Course>("DELETE FROM courses WHERE id = $1 RETURNING *")
                .bind(course_id)
                .fetch_optional(&mut tx)
                .await
                .context("failed to delete course")?
        else {
            return Ok(None);
        };
        let sections = sqlx::query_as::<_, Section>(
            "DELETE FROM course_sections WHERE course_id = $1 RETURNING *",
        )
        .bind(course_id)
        .fetch_all(&mut tx)
        .await
        .context("failed to delete course sections")?;
        let section_ids: Vec<Uuid> = sections.iter().map(|section| section.id).collect();
        let rows = sqlx::query_as::<_, LessonRow>(
            "DELETE FROM lessons WHERE section_id = ANY($1) RETURNING *",
        )
        .bind(&section_ids)
        .fetch_all(&mut tx)
        .await
        .context("failed to delete section lessons")?;
        let lessons = rows
            .into_iter()
            .map(Lesson::try_from)
            .collect::<Result<Vec<_>>>()?;
        tx.commit().await?;
        Ok(Some(CourseRemoval::assemble(course, sections, lessons)))
    }

    async fn insert_section(&self, section: &Section) -> Result<()> {
        sqlx::query(
            "INSERT INTO course_sections (id, course_id, tenant_id, title, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(section.id)
        .bind(section.course_id)
        .bind(section.tenant_id)
        .bind(&section.title)
        .bind(section.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert section")?;
        Ok(())
    }

    async fn find_section(&self, section_id: Uuid) -> Result<Option<Section>> {
        sqlx::query_as::<_, Section>("SELECT * FROM course_sections WHERE id = $1")
            .bind(section_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load section")
    }

    async fn sections_of_course(&self, course_id: Uuid) -> Result<Vec<Section>> {
        sqlx::query_as::<_, Section>(
            "SELECT * FROM course_sections WHERE course_id = $1 ORDER BY created_at",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list sections")
    }

    async fn insert_lesson(&self, lesson: &Lesson) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lessons (
                id, section_id, tenant_id, title, hosting, external_url, video_asset_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(lesson.id)
        .bind(lesson.section_id)
        .bind(lesson.tenant_id)
        .bind(&lesson.title)
        .bind(lesson.hosting.as_str())
        .bind(&lesson.external_url)
        .bind(lesson.video_asset_id)
        .bind(lesson.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert lesson")?;
        Ok(())
    }

    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>> {
        let row = sqlx::query_as::<_, LessonRow>("SELECT * FROM lessons WHERE id = $1")
            .bind(lesson_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to load lesson")?;
        row.map(Lesson::try_from).transpose()
    }

    async fn lessons_of_section(&self, section_id: Uuid) -> Result<Vec<Lesson>> {
        let rows = sqlx::query_as::<_, LessonRow>(
            "SELECT * FROM lessons WHERE section_id = $1 ORDER BY created_at",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list lessons")?;
        rows.into_iter().map(Lesson::try_from).collect()
    }

    async fn delete_lesson(&self, lesson_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM lessons WHERE id = $1")
            .bind(lesson_id)
            .execute(&self.pool)
            .await
            .context("failed to delete lesson")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_video_asset(&self, asset: &VideoAsset) -> Result<()> {
        sqlx::query(
            "INSERT INTO video_assets (id, tenant_id, duration_seconds, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(asset.id)
        .bind(asset.tenant_id)
        .bind(asset.duration_seconds)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert video asset")?;
        Ok(())
    }

    async fn set_asset_duration(
        &self,
        asset_id: Uuid,
        duration_seconds: i64,
    ) -> Result<Option<VideoAsset>> {
        sqlx::query_as::<_, VideoAsset>(
            "UPDATE video_assets SET duration_seconds = $2 WHERE id = $1 RETURNING *",
        )
        .bind(asset_id)
        .bind(duration_seconds)
        .fetch_optional(&self.pool)
        .await
        .context("failed to record asset duration")
    }

    async fn billable_lessons(&self, tenant_id: Uuid) -> Result<Vec<BillableLesson>> {
        let rows = sqlx::query_as::<_, BillableLessonRow>(
            r#"
            SELECT l.id AS lesson_id, l.hosting, a.duration_seconds
            FROM lessons l
            LEFT JOIN video_assets a ON a.id = l.video_asset_id
            WHERE l.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to aggregate billable lessons")?;
        rows.into_iter().map(BillableLesson::try_from).collect()
    }

    async fn detach_protected_videos(&self, tenant_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE lessons SET hosting = 'none', video_asset_id = NULL WHERE tenant_id = $1 AND hosting = 'protected'",
        )
        .bind(tenant_id)
        .execute(&mut tx)
        .await
        .context("failed to unlink protected lessons")?;
        let removed = sqlx::query("DELETE FROM video_assets WHERE tenant_id = $1")
            .bind(tenant_id)
            .execute(&mut tx)
            .await
            .context("failed to delete protected assets")?;
        tx.commit().await?;
        Ok(removed.rows_affected())
    }
}
