/// Health and metrics endpoints
use crate::{context::AppContext, error::NotifyResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Readiness report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub database_ms: Option<u64>,
    pub push_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
}

/// Basic health check
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe; 503 while the database is unreachable
pub async fn readiness_probe(State(ctx): State<AppContext>) -> (StatusCode, Json<ReadinessStatus>) {
    let start = Instant::now();
    let push_provider = if ctx.config.push.is_some() { "fcm" } else { "disabled" }.to_string();

    match check_database(&ctx).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessStatus {
                status: "ready".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                database_ms: Some(start.elapsed().as_millis() as u64),
                push_provider,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "readiness_probe_failed: database check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessStatus {
                    status: "unavailable".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    database_ms: None,
                    push_provider,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn check_database(ctx: &AppContext) -> NotifyResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

/// Prometheus text exposition
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}
