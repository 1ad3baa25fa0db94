//! HTTP request handlers for the two plain endpoints: a liveness hello and
//! a body echo. The WebSocket upgrade handlers live in `crate::websocket`.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness hello: service identity, uptime and ingest counters.
pub async fn hello(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();

    HttpResponse::Ok().json(json!({
        "service": {
            "name": "audio-ingest-backend",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "ingest": {
            "sessions_started": metrics.sessions_started,
            "sessions_active": metrics.sessions_active,
            "frames_received": metrics.frames_received,
            "bytes_received": metrics.bytes_received,
        }
    }))
}

/// Reflect the request body back unchanged.
pub async fn echo_body(body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok().body(body)
}
