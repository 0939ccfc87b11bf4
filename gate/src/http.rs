//! Registry admin HTTP surface (spec §6).
//!
//! Grounded in the teacher's `bin/server.rs` — `Arc<AppState>` behind
//! `axum::extract::State`, `TraceLayer` for request logging, a thin
//! JSON envelope per handler. The admin surface is explicitly named an
//! "external collaborator" in spec §1, so this module only implements
//! the four endpoints §6 lists plus the Prometheus scrape target
//! SPEC_FULL §C.2 adds; it is not where evaluation or audit logic lives.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::audit::AuditPipeline;
use crate::decision_chain::DecisionChainTracker;
use crate::observability::{render_prometheus, Snapshot};
use crate::registry::{RegistryStats, TenantConnectorRegistry};

pub struct AppState {
    pub registry: Option<TenantConnectorRegistry>,
    pub pipeline: Option<AuditPipeline>,
    pub tracker: Option<DecisionChainTracker>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/connectors/refresh", post(refresh_all))
        .route("/api/v1/connectors/refresh/{tenant_id}", post(refresh_tenant))
        .route("/api/v1/connectors/refresh/{tenant_id}/{connector_name}", post(refresh_connector))
        .route("/api/v1/connectors/cache/stats", get(cache_stats))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    success: bool,
    scope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    connector: Option<String>,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<RegistryStats>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn unavailable() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            success: false,
            error: "registry uninitialized".to_string(),
        }),
    )
}

fn bad_path_param(name: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: format!("missing path parameter: {name}"),
        }),
    )
}

async fn refresh_all(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(registry) = &state.registry else {
        return Err(unavailable());
    };

    let start = Instant::now();
    registry.refresh_all().await;

    Ok(Json(RefreshResponse {
        success: true,
        scope: "all",
        tenant_id: None,
        connector: None,
        duration_ms: start.elapsed().as_millis(),
        stats: None,
    }))
}

async fn refresh_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<RefreshResponse>, (StatusCode, Json<ErrorResponse>)> {
    if tenant_id.is_empty() {
        return Err(bad_path_param("tenant_id"));
    }
    let Some(registry) = &state.registry else {
        return Err(unavailable());
    };

    let start = Instant::now();
    registry.refresh_tenant(&tenant_id).await;

    Ok(Json(RefreshResponse {
        success: true,
        scope: "tenant",
        tenant_id: Some(tenant_id),
        connector: None,
        duration_ms: start.elapsed().as_millis(),
        stats: None,
    }))
}

async fn refresh_connector(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, connector_name)): Path<(String, String)>,
) -> Result<Json<RefreshResponse>, (StatusCode, Json<ErrorResponse>)> {
    if tenant_id.is_empty() {
        return Err(bad_path_param("tenant_id"));
    }
    if connector_name.is_empty() {
        return Err(bad_path_param("connector_name"));
    }
    let Some(registry) = &state.registry else {
        return Err(unavailable());
    };

    let start = Instant::now();
    registry.refresh_connector(&tenant_id, &connector_name).await;

    Ok(Json(RefreshResponse {
        success: true,
        scope: "connector",
        tenant_id: Some(tenant_id),
        connector: Some(connector_name),
        duration_ms: start.elapsed().as_millis(),
        stats: None,
    }))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(registry) = &state.registry else {
        return Err(unavailable());
    };

    Ok(Json(RefreshResponse {
        success: true,
        scope: "all",
        tenant_id: None,
        connector: None,
        duration_ms: 0,
        stats: Some(registry.stats()),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let (Some(pipeline), Some(tracker), Some(registry)) = (&state.pipeline, &state.tracker, &state.registry) else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                success: false,
                error: "core not fully initialized".to_string(),
            }),
        ));
    };

    let pipeline_stats = pipeline.stats();
    let tracker_stats = tracker.stats();
    let registry_stats = registry.stats();

    Ok(render_prometheus(&Snapshot {
        pipeline: &pipeline_stats,
        tracker: &tracker_stats,
        registry: &registry_stats,
        registry_count: registry.count(),
    }))
}
