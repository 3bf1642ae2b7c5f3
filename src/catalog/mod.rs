pub mod api;
pub mod cascade;
pub mod models;
pub mod service;
pub mod store;

pub use cascade::{CatalogChange, ChangePropagator, PropagationReport, TenantRecalc};
pub use models::{
    BillableLesson, Course, CourseRemoval, Lesson, NewLesson, Section, SectionRemoval, VideoAsset,
    VideoHosting,
};
pub use service::{CatalogError, CatalogService, LessonChange};
pub use store::{CatalogStore, PgCatalogStore};
