use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::{billing, catalog, webhooks};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/webhooks/gateway", post(webhooks::gateway_webhook))
        .route(
            "/api/tenants/:id/subscription",
            get(billing::api::get_subscription),
        )
        .route("/api/tenants/:id/plan", get(billing::api::get_plan))
        .route(
            "/api/tenants/:id/billing/recalculate",
            post(billing::api::recalculate),
        )
        .route(
            "/api/tenants/:id/billing/transactions",
            get(billing::api::list_transactions),
        )
        .route("/api/tenants/:id/courses", post(catalog::api::create_course))
        .route("/api/courses/:id", delete(catalog::api::delete_course))
        .route(
            "/api/courses/:id/sections",
            post(catalog::api::create_section),
        )
        .route(
            "/api/sections/:id/lessons",
            post(catalog::api::create_lesson),
        )
        .route("/api/lessons/:id", delete(catalog::api::delete_lesson))
        .route(
            "/api/video-assets/:id/duration",
            put(catalog::api::set_asset_duration),
        )
}
