#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_billing::billing::{
    process_due, BillingService, GatewayError, GatewayEvent, PaymentGateway, Subscription,
    TransactionHistory,
};
use course_billing::catalog::{NewLesson, VideoHosting};
use course_billing::config::BillingSettings;
use course_billing::memory::InMemoryBackends;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Gateway double that records every amount update.
#[derive(Default)]
pub struct RecordingGateway {
    pub updates: Mutex<Vec<(i64, i64)>>,
    pub fail_updates: AtomicBool,
}

impl RecordingGateway {
    pub async fn updates(&self) -> Vec<(i64, i64)> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn update_amount(&self, external_id: i64, amount_cents: i64) -> Result<(), GatewayError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                operation: "amount update",
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.updates.lock().await.push((external_id, amount_cents));
        Ok(())
    }

    async fn list_transactions(&self, _external_id: i64) -> Result<TransactionHistory, GatewayError> {
        Ok(TransactionHistory::from_summaries(Vec::new()))
    }
}

pub struct Harness {
    pub stores: InMemoryBackends,
    pub gateway: Arc<RecordingGateway>,
    pub billing: BillingService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(BillingSettings::default())
    }

    pub fn with_settings(settings: BillingSettings) -> Self {
        let stores = InMemoryBackends::new();
        let gateway = Arc::new(RecordingGateway::default());
        let billing = BillingService::new(stores.backends(), gateway.clone(), settings);
        Self {
            stores,
            gateway,
            billing,
        }
    }

    pub fn tenant(&self, email: &str) -> Uuid {
        self.stores.tenants.add(email, "Academy").id
    }

    pub async fn deliver(&self, payload: Value) -> course_billing::billing::WebhookOutcome {
        let event: GatewayEvent = serde_json::from_value(payload).unwrap();
        self.billing.lifecycle().apply(event).await.unwrap()
    }

    pub async fn subscription(&self, tenant_id: Uuid) -> Option<Subscription> {
        self.billing.subscription(tenant_id).await.unwrap()
    }

    pub async fn run_due(&self) -> usize {
        self.run_due_at(Utc::now()).await
    }

    pub async fn run_due_at(&self, now: DateTime<Utc>) -> usize {
        let executor = self.billing.executor();
        process_due(self.stores.tasks.as_ref(), executor.as_ref(), now)
            .await
            .unwrap()
    }

    /// Creates a course, a section and a protected lesson, then records `seconds` of video.
    pub async fn protected_lesson(&self, tenant_id: Uuid, seconds: i64) -> Uuid {
        let catalog = self.billing.catalog();
        let course = catalog.create_course(tenant_id, "Course").await.unwrap();
        let section = catalog.create_section(course.id, "Section").await.unwrap();
        let change = catalog
            .create_lesson(
                section.id,
                NewLesson {
                    title: "Lesson".to_string(),
                    hosting: VideoHosting::Protected,
                    external_url: None,
                },
            )
            .await
            .unwrap();
        let asset_id = change.lesson.video_asset_id.unwrap();
        catalog
            .record_asset_duration(asset_id, seconds)
            .await
            .unwrap();
        change.lesson.id
    }
}

pub fn created(external_id: i64, email: &str, amount_cents: i64, next_billing: &str) -> Value {
    json!({
        "trigger_type": "subscription_created",
        "subscription_data": {
            "id": external_id,
            "client_info": { "email": email },
            "state": "active",
            "amount_cents": amount_cents,
            "next_billing": next_billing,
        }
    })
}

pub fn lifecycle(trigger: &str, external_id: i64, next_billing: Option<&str>) -> Value {
    json!({
        "trigger_type": trigger,
        "subscription_data": {
            "id": external_id,
            "next_billing": next_billing,
        }
    })
}
