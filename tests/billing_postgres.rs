use chrono::{Duration, Utc};
use course_billing::billing::{
    NewSubscription, PendingTask, PgSubscriptionStore, PgTaskRegistry, PgTenantDirectory,
    SubscriptionStatus, SubscriptionStore, TaskJob, TaskKind, TaskRegistry, TenantDirectory,
};
use course_billing::catalog::{
    CatalogStore, Course, Lesson, PgCatalogStore, Section, VideoAsset, VideoHosting,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_tenant(pool: &PgPool, email: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO tenants (id, email, name) VALUES ($1, $2, $3) RETURNING id")
        .bind(Uuid::new_v4())
        .bind(email)
        .bind("Academy")
        .fetch_one(pool)
        .await
        .unwrap()
}

fn new_subscription(tenant_id: Uuid, external_id: i64) -> NewSubscription {
    let now = Utc::now();
    NewSubscription {
        tenant_id,
        status: SubscriptionStatus::Active,
        external_subscription_id: external_id,
        amount_cents: 50_000,
        last_renewal_date: now,
        current_period_end: now + Duration::days(30),
    }
}

// key: billing-postgres-tests -> optimistic versioning on the subscription row
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn subscription_store_enforces_versions(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let tenant_id = seed_tenant(&pool, "Owner@Example.com").await;
    let tenants = PgTenantDirectory::new(pool.clone());
    assert_eq!(
        tenants
            .find_by_email("owner@example.com")
            .await
            .unwrap()
            .map(|tenant| tenant.id),
        Some(tenant_id)
    );

    let store = PgSubscriptionStore::new(pool.clone());
    let inserted = store
        .insert(new_subscription(tenant_id, 9001))
        .await
        .unwrap()
        .expect("first insert wins");
    assert!(store
        .insert(new_subscription(tenant_id, 9002))
        .await
        .unwrap()
        .is_none());

    let mut suspended = inserted.clone();
    suspended.status = SubscriptionStatus::Inactive;
    let saved = store
        .compare_and_save(&suspended)
        .await
        .unwrap()
        .expect("version matches");
    assert_eq!(saved.version, inserted.version + 1);

    // Stale writer still holds the original version.
    assert!(store.compare_and_save(&inserted).await.unwrap().is_none());
    assert!(!store.delete(saved.id, inserted.version).await.unwrap());
    assert!(store.delete(saved.id, saved.version).await.unwrap());
    assert!(store.find_by_external_id(9001).await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn task_registry_keeps_one_row_per_tenant_and_kind(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let tenant_id = seed_tenant(&pool, "tasks@example.com").await;
    let registry = PgTaskRegistry::new(pool.clone());
    let now = Utc::now();

    let first = PendingTask::new(tenant_id, now + Duration::days(30), TaskJob::Cleanup, now);
    let second = PendingTask::new(tenant_id, now - Duration::seconds(1), TaskJob::Cleanup, now);
    assert!(registry.replace(&first).await.unwrap().is_none());
    let superseded = registry.replace(&second).await.unwrap().expect("previous handle");
    assert_eq!(superseded.id, first.id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM billing_pending_tasks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let claimed = registry.claim_due(Utc::now(), 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, second.id);
    assert!(registry.claim_due(Utc::now(), 10).await.unwrap().is_empty());
    assert!(registry
        .find(tenant_id, TaskKind::Cleanup)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn catalog_store_aggregates_and_detaches_protected_video(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let tenant_id = seed_tenant(&pool, "catalog@example.com").await;
    let store = PgCatalogStore::new(pool.clone());
    let now = Utc::now();

    let course = Course {
        id: Uuid::new_v4(),
        tenant_id,
        title: "Course".to_string(),
        created_at: now,
    };
    store.insert_course(&course).await.unwrap();
    let section = Section {
        id: Uuid::new_v4(),
        course_id: course.id,
        tenant_id,
        title: "Section".to_string(),
        created_at: now,
    };
    store.insert_section(&section).await.unwrap();
    let asset = VideoAsset {
        id: Uuid::new_v4(),
        tenant_id,
        duration_seconds: None,
        created_at: now,
    };
    store.insert_video_asset(&asset).await.unwrap();
    let lesson = Lesson {
        id: Uuid::new_v4(),
        section_id: section.id,
        tenant_id,
        title: "Protected".to_string(),
        hosting: VideoHosting::Protected,
        external_url: None,
        video_asset_id: Some(asset.id),
        created_at: now,
    };
    store.insert_lesson(&lesson).await.unwrap();

    store.set_asset_duration(asset.id, 95).await.unwrap();
    let billable = store.billable_lessons(tenant_id).await.unwrap();
    assert_eq!(billable.len(), 1);
    assert_eq!(billable[0].duration_seconds, Some(95));
    assert_eq!(store.count_courses(tenant_id).await.unwrap(), 1);

    assert_eq!(store.detach_protected_videos(tenant_id).await.unwrap(), 1);
    let stored = store.find_lesson(lesson.id).await.unwrap().unwrap();
    assert_eq!(stored.hosting, VideoHosting::None);
    assert!(stored.video_asset_id.is_none());

    let removal = store
        .delete_course_tree(course.id)
        .await
        .unwrap()
        .expect("course row");
    assert_eq!(removal.sections.len(), 1);
    assert_eq!(removal.sections[0].lessons.len(), 1);
    assert!(store.find_section(section.id).await.unwrap().is_none());
    assert!(store.find_lesson(lesson.id).await.unwrap().is_none());
    assert!(store.billable_lessons(tenant_id).await.unwrap().is_empty());
    assert!(store.delete_course_tree(course.id).await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn external_id_conflicts_are_reported_as_no_write(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let first = seed_tenant(&pool, "first@example.com").await;
    let second = seed_tenant(&pool, "second@example.com").await;
    let store = PgSubscriptionStore::new(pool.clone());

    store
        .insert(new_subscription(first, 9100))
        .await
        .unwrap()
        .expect("first insert");
    assert!(store
        .insert(new_subscription(second, 9100))
        .await
        .unwrap()
        .is_none());

    let own = store
        .insert(new_subscription(second, 9101))
        .await
        .unwrap()
        .expect("distinct external id");
    let mut hijack = own.clone();
    hijack.external_subscription_id = 9100;
    assert!(store.compare_and_save(&hijack).await.unwrap().is_none());
    assert_eq!(
        store.find_by_tenant(second).await.unwrap().unwrap().external_subscription_id,
        9101
    );
}
