use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use course_billing::billing::{
    spawn_task_worker, BillingBackends, BillingService, HttpGateway,
};
use course_billing::config::{self, BillingSettings};
use course_billing::routes::api_routes;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "Course Billing API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    // Run migrations if available
    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let settings = BillingSettings::from_env();
    if settings.webhook_secret.is_none() {
        tracing::warn!(
            "GATEWAY_WEBHOOK_SECRET is not set; gateway webhooks are accepted without signature checks"
        );
    }
    if settings.gateway_api_key.is_none() {
        tracing::warn!("GATEWAY_API_KEY is not set; outbound billing syncs will fail");
    }

    let gateway = HttpGateway::new(
        settings.gateway_base_url.clone(),
        settings.gateway_api_key.clone(),
        settings.gateway_timeout,
    )?;
    let poll_interval = settings.task_poll_interval;
    let billing = BillingService::new(
        BillingBackends::postgres(pool.clone()),
        Arc::new(gateway),
        settings,
    );
    spawn_task_worker(billing.tasks().clone(), billing.executor(), poll_interval);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(billing));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
