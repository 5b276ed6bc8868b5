/**
 * API REST HOSTSNAP - lecture de l'état du pipeline de réconciliation
 *
 * ROUTES :
 * - GET /health                     → liveness, sans authentification
 * - GET /system/health              → compteurs, génération active, filtre négatif
 * - GET /hosts/{cloud_id}/{ip}      → enregistrement en cache (génération active)
 * - GET /snapshots/{host_id}        → dernier snapshot brut publié
 *
 * SÉCURITÉ :
 * - Header x-api-key (SYMBION_API_KEY) obligatoire sauf /health
 */

use crate::engine::ReconciliationEngine;
use crate::health::{HealthTracker, HostsnapHealth};
use crate::models::{HostKey, HostRecord};
use crate::snapcache::MemorySnapshotCache;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::warn;

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("SYMBION_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("SYMBION_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub health_tracker: HealthTracker,
    pub snapshots: Arc<MemorySnapshotCache>,
    pub snapshot_prefix: String,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts/{cloud_id}/{ip}", get(get_host))
        .route("/snapshots/{host_id}", get(get_snapshot))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<HostsnapHealth> {
    Json(app.health_tracker.get_health(&app.engine))
}

// GET /hosts/{cloud_id}/{ip}
async fn get_host(
    State(app): State<AppState>,
    Path((cloud_id, ip)): Path<(i64, String)>,
) -> Result<Json<HostRecord>, StatusCode> {
    let generation = app.engine.resolver().generation();
    let host = generation.get(&HostKey::new(cloud_id, &ip)).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(host.record()))
}

// GET /snapshots/{host_id}
async fn get_snapshot(State(app): State<AppState>, Path(host_id): Path<i64>) -> Result<Response, StatusCode> {
    let key = format!("{}{}", app.snapshot_prefix, host_id);
    let payload = app.snapshots.get(&key).ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], payload).into_response())
}
