/**
 * API HTTP - Endpoint de scrape et statut de l'exporter
 *
 * ROUTES :
 * - GET /metrics : exposition texte Prometheus du jeu de métriques en cache
 * - GET /status  : vue JSON de la fraîcheur, dernière erreur et compteurs
 * - GET /health  : liveness ("ok")
 *
 * FONCTIONNEMENT :
 * Les handlers lisent uniquement le cache de collecte. Ils ne contactent
 * jamais le BMC : un scrape coûte un clone d'Arc plus le rendu.
 */

use crate::cache::CollectionCache;
use crate::health::{ExporterHealth, HealthTracker};
use crate::render::render;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::error;

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CollectionCache>,
    pub health: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(get_metrics))
        .route("/status", get(get_status))
        .with_state(app_state)
}

// GET /metrics
async fn get_metrics(State(app): State<AppState>) -> Response {
    let snapshot = app.cache.get();
    match render(&snapshot, &app.health) {
        Ok(body) => ([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<ExporterHealth> {
    let snapshot = app.cache.get();
    Json(app.health.get_health(&snapshot))
}
