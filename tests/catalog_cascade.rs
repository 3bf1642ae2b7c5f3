mod common;

use common::{created, lifecycle, Harness};
use course_billing::billing::{Capability, Plan};
use course_billing::catalog::{CatalogError, CatalogStore, NewLesson, VideoHosting};

fn external(title: &str) -> NewLesson {
    NewLesson {
        title: title.to_string(),
        hosting: VideoHosting::External,
        external_url: Some("https://videos.example.com/intro".to_string()),
    }
}

// key: catalog-cascade-tests -> parent deletes remove every descendant
#[tokio::test]
async fn deleting_a_course_removes_its_sections_and_lessons_only() {
    let harness = Harness::new();
    let tenant_id = harness.tenant("owner@example.com");
    let catalog = harness.billing.catalog();

    let doomed = catalog.create_course(tenant_id, "Doomed").await.unwrap();
    let kept = catalog.create_course(tenant_id, "Kept").await.unwrap();

    let mut doomed_lessons = Vec::new();
    for section_title in ["One", "Two"] {
        let section = catalog.create_section(doomed.id, section_title).await.unwrap();
        for lesson_title in ["a", "b", "c"] {
            let change = catalog
                .create_lesson(section.id, external(lesson_title))
                .await
                .unwrap();
            doomed_lessons.push(change.lesson.id);
        }
    }
    let kept_section = catalog.create_section(kept.id, "Kept section").await.unwrap();
    let kept_lesson = catalog
        .create_lesson(kept_section.id, external("kept"))
        .await
        .unwrap()
        .lesson;

    let report = catalog.delete_course(doomed.id).await.unwrap();
    assert_eq!(report.sections_deleted, 2);
    assert_eq!(report.lessons_deleted, 6);
    assert!(report.recalculated.is_empty(), "external lessons are not billable");

    let store = &harness.stores.catalog;
    assert!(store.find_course(doomed.id).await.unwrap().is_none());
    assert!(store.sections_of_course(doomed.id).await.unwrap().is_empty());
    assert_eq!(
        store.lessons_of_section(kept_section.id).await.unwrap().len(),
        1
    );
    for lesson_id in doomed_lessons {
        assert!(store.find_lesson(lesson_id).await.unwrap().is_none());
    }
    assert!(store.find_course(kept.id).await.unwrap().is_some());
    assert!(store.find_section(kept_section.id).await.unwrap().is_some());
    assert!(store.find_lesson(kept_lesson.id).await.unwrap().is_some());

    assert!(matches!(
        catalog.delete_course(doomed.id).await,
        Err(CatalogError::NotFound("course"))
    ));
}

#[tokio::test]
async fn cascading_protected_lessons_recalculates_once_per_tenant() {
    let harness = Harness::new();
    let tenant_id = harness.tenant("owner@example.com");
    harness
        .deliver(created(701, "owner@example.com", 50_000, "2025-03-01T00:00:00Z"))
        .await;
    let catalog = harness.billing.catalog();

    let course = catalog.create_course(tenant_id, "Video course").await.unwrap();
    let section = catalog.create_section(course.id, "Videos").await.unwrap();
    for title in ["first", "second"] {
        let lesson = catalog
            .create_lesson(
                section.id,
                NewLesson {
                    title: title.to_string(),
                    hosting: VideoHosting::Protected,
                    external_url: None,
                },
            )
            .await
            .unwrap()
            .lesson;
        catalog
            .record_asset_duration(lesson.video_asset_id.unwrap(), 600)
            .await
            .unwrap();
    }
    harness.run_due().await;
    assert_eq!(harness.subscription(tenant_id).await.unwrap().amount_cents, 51_000);

    let report = catalog.delete_course(course.id).await.unwrap();
    assert_eq!(report.lessons_deleted, 2);
    assert_eq!(report.recalculated.len(), 1);
    assert_eq!(report.recalculated[0].tenant_id, tenant_id);

    harness.run_due().await;
    assert_eq!(harness.subscription(tenant_id).await.unwrap().amount_cents, 50_000);
}

// key: plan-gate-tests -> free plan ceiling and upgrade
#[tokio::test]
async fn free_plan_course_limit_lifts_after_upgrade() {
    let harness = Harness::new();
    let tenant_id = harness.tenant("owner@example.com");
    let catalog = harness.billing.catalog();

    for title in ["one", "two", "three"] {
        catalog.create_course(tenant_id, title).await.unwrap();
    }
    match catalog.create_course(tenant_id, "four").await {
        Err(CatalogError::LimitExceeded(limit)) => {
            assert_eq!(limit.plan, Plan::Free);
            assert_eq!(limit.capability, Capability::CreateCourse);
            assert_eq!(limit.limit, Some(3));
        }
        other => panic!("expected limit rejection, got {other:?}"),
    }
    assert_eq!(harness.stores.catalog.count_courses(tenant_id).await.unwrap(), 3);

    harness
        .deliver(created(702, "owner@example.com", 50_000, "2025-03-01T00:00:00Z"))
        .await;
    assert_eq!(harness.billing.gate().plan_for(tenant_id).await.unwrap(), Plan::Paid);
    catalog.create_course(tenant_id, "four").await.unwrap();

    harness
        .deliver(lifecycle("subscription_suspended", 702, None))
        .await;
    assert_eq!(harness.billing.gate().plan_for(tenant_id).await.unwrap(), Plan::Free);
    assert!(matches!(
        catalog.create_course(tenant_id, "five").await,
        Err(CatalogError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn protected_hosting_requires_a_paid_plan() {
    let harness = Harness::new();
    let tenant_id = harness.tenant("owner@example.com");
    let catalog = harness.billing.catalog();
    let course = catalog.create_course(tenant_id, "Course").await.unwrap();
    let section = catalog.create_section(course.id, "Section").await.unwrap();

    let rejected = catalog
        .create_lesson(
            section.id,
            NewLesson {
                title: "Protected".to_string(),
                hosting: VideoHosting::Protected,
                external_url: None,
            },
        )
        .await;
    assert!(matches!(
        rejected,
        Err(CatalogError::LimitExceeded(ref limit)) if limit.capability == Capability::ProtectedHosting
    ));
    assert!(harness
        .stores
        .catalog
        .billable_lessons(tenant_id)
        .await
        .unwrap()
        .is_empty());

    let missing_url = catalog
        .create_lesson(
            section.id,
            NewLesson {
                title: "Link".to_string(),
                hosting: VideoHosting::External,
                external_url: None,
            },
        )
        .await;
    assert!(matches!(missing_url, Err(CatalogError::Invalid(_))));
}

#[tokio::test]
async fn course_tree_is_removed_in_one_store_call() {
    let harness = Harness::new();
    let tenant_id = harness.tenant("owner@example.com");
    harness
        .deliver(created(703, "owner@example.com", 50_000, "2025-03-01T00:00:00Z"))
        .await;
    let catalog = harness.billing.catalog();
    let course = catalog.create_course(tenant_id, "Course").await.unwrap();
    let first = catalog.create_section(course.id, "First").await.unwrap();
    let second = catalog.create_section(course.id, "Second").await.unwrap();
    catalog.create_lesson(first.id, external("link")).await.unwrap();
    let protected = catalog
        .create_lesson(
            second.id,
            NewLesson {
                title: "Video".to_string(),
                hosting: VideoHosting::Protected,
                external_url: None,
            },
        )
        .await
        .unwrap()
        .lesson;

    let store = &harness.stores.catalog;
    let removal = store
        .delete_course_tree(course.id)
        .await
        .unwrap()
        .expect("course existed");
    assert_eq!(removal.course.id, course.id);
    assert_eq!(removal.sections.len(), 2);
    assert_eq!(removal.sections[0].section.id, first.id);
    assert_eq!(removal.sections[1].lessons, vec![protected.clone()]);
    assert_eq!(removal.lessons().count(), 2);

    // Nothing billable is left behind once the tree is gone.
    assert!(store.billable_lessons(tenant_id).await.unwrap().is_empty());
    assert!(store.find_section(second.id).await.unwrap().is_none());
    assert!(store.delete_course_tree(course.id).await.unwrap().is_none());
}
