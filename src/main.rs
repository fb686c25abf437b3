mod auth;
mod booking;
mod config;
mod middleware;

mod db;
mod error;
mod models;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    booking::{BookingService, EstimatePolicy, RetryPolicy, pg::PgStore},
    config::Config,
    models::AppState,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg).await?;

    let store = PgStore::new(pool.clone());
    if let Some(quota) = cfg.initial_daily_quota {
        if store.seed_quota_if_empty(quota).await? {
            tracing::info!(quota, "seeded daily quota");
        }
    }

    let booking = BookingService::new(
        Arc::new(store.clone()),
        Arc::new(store),
        EstimatePolicy::new(cfg.opd_start_time, cfg.opd_slot_minutes),
        RetryPolicy {
            max_attempts: cfg.booking_max_attempts,
            base_backoff: Duration::from_millis(cfg.booking_retry_backoff_ms),
        },
    );

    let state = AppState { db: pool, booking };

    // The patient portal is served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
