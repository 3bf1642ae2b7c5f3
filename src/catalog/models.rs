use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: catalog-hosting -> only protected hosting is billable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoHosting {
    None,
    External,
    Protected,
}

impl VideoHosting {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoHosting::None => "none",
            VideoHosting::External => "external",
            VideoHosting::Protected => "protected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(VideoHosting::None),
            "external" => Some(VideoHosting::External),
            "protected" => Some(VideoHosting::Protected),
            _ => None,
        }
    }
}

impl fmt::Display for VideoHosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    pub course_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub section_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub hosting: VideoHosting,
    pub external_url: Option<String>,
    /// Set only for protected hosting.
    pub video_asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct LessonRow {
    pub id: Uuid,
    pub section_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub hosting: String,
    pub external_url: Option<String>,
    pub video_asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LessonRow> for Lesson {
    type Error = anyhow::Error;

    fn try_from(row: LessonRow) -> Result<Self, Self::Error> {
        let hosting = VideoHosting::parse(&row.hosting)
            .ok_or_else(|| anyhow::anyhow!("unknown lesson hosting `{}`", row.hosting))?;
        Ok(Lesson {
            id: row.id,
            section_id: row.section_id,
            tenant_id: row.tenant_id,
            title: row.title,
            hosting,
            external_url: row.external_url,
            video_asset_id: row.video_asset_id,
            created_at: row.created_at,
        })
    }
}

/// A section removed together with its lessons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRemoval {
    pub section: Section,
    pub lessons: Vec<Lesson>,
}

/// A course and everything under it, removed in one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRemoval {
    pub course: Course,
    pub sections: Vec<SectionRemoval>,
}

impl CourseRemoval {
    /// Groups the deleted lessons under their sections, oldest first.
    pub(crate) fn assemble(
        course: Course,
        mut sections: Vec<Section>,
        lessons: Vec<Lesson>,
    ) -> Self {
        let mut by_section: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
        for lesson in lessons {
            by_section.entry(lesson.section_id).or_default().push(lesson);
        }
        sections.sort_by_key(|section| section.created_at);
        let sections = sections
            .into_iter()
            .map(|section| {
                let mut lessons = by_section.remove(&section.id).unwrap_or_default();
                lessons.sort_by_key(|lesson| lesson.created_at);
                SectionRemoval { section, lessons }
            })
            .collect();
        Self { course, sections }
    }

    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.sections.iter().flat_map(|removal| removal.lessons.iter())
    }
}

/// Protected upload; the duration arrives later from the video host.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct VideoAsset {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One lesson's contribution to billable usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillableLesson {
    pub lesson_id: Uuid,
    pub hosting: VideoHosting,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, FromRow)]
pub(crate) struct BillableLessonRow {
    pub lesson_id: Uuid,
    pub hosting: String,
    pub duration_seconds: Option<i64>,
}

impl TryFrom<BillableLessonRow> for BillableLesson {
    type Error = anyhow::Error;

    fn try_from(row: BillableLessonRow) -> Result<Self, Self::Error> {
        let hosting = VideoHosting::parse(&row.hosting)
            .ok_or_else(|| anyhow::anyhow!("unknown lesson hosting `{}`", row.hosting))?;
        Ok(BillableLesson {
            lesson_id: row.lesson_id,
            hosting,
            duration_seconds: row.duration_seconds,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLesson {
    pub title: String,
    pub hosting: VideoHosting,
    #[serde(default)]
    pub external_url: Option<String>,
}
