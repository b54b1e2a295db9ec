//! Observability HTTP surface
//!
//! Three read-only JSON endpoints: `/health`, `/metrics`, `/quality`.
//! No config mutation, no dashboards; the admin surface lives elsewhere.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::enrichment::quality::QualityReader;
use crate::enrichment::HealthRating;
use crate::harness::CleanupQueue;
use crate::hub::session::SessionState;
use crate::hub::SessionMetrics;
use crate::scheduler::SchedulerMetrics;
use crate::timeseries::WriterMetrics;

/// Shared read handles for the router.
#[derive(Clone)]
pub struct ApiState {
    pub quality: QualityReader,
    pub writer: Arc<WriterMetrics>,
    pub session: Arc<SessionMetrics>,
    pub session_state: Arc<arc_swap::ArcSwap<SessionState>>,
    pub scheduler: Arc<SchedulerMetrics>,
    pub cleanup: Arc<CleanupQueue>,
    pub started_at: DateTime<Utc>,
}

/// Build the router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/quality", get(quality))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let quality = state.quality.snapshot();
    let writer = state.writer.snapshot();
    let session_state = **state.session_state.load();

    let healthy = quality.health() == HealthRating::Healthy
        && !writer.degraded
        && session_state == SessionState::Active;
    let status = if healthy {
        "healthy"
    } else if quality.health() == HealthRating::Unhealthy {
        "unhealthy"
    } else {
        "degraded"
    };

    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "status": status,
            "hub_session": session_state,
            "validation_health": quality.health(),
            "writer_degraded": writer.degraded,
            "pending_cleanup": state.cleanup.pending_count(),
            "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        })),
    )
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "session": state.session.snapshot(),
        "writer": state.writer.snapshot(),
        "scheduler": state.scheduler.snapshot(),
        "pending_cleanup": state.cleanup.pending_count(),
    }))
}

async fn quality(State(state): State<ApiState>) -> impl IntoResponse {
    Json((*state.quality.snapshot()).clone())
}
