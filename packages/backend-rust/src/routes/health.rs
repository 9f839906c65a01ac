use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Serialize)]
struct LiveResponse {
    status: &'static str,
}

async fn root(State(state): State<AppState>) -> Response {
    let connected = database_connected(&state).await;

    let response = HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        database: if connected { "connected" } else { "disconnected" },
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    };

    let status_code = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

async fn live() -> Response {
    Json(LiveResponse { status: "ok" }).into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    if database_connected(&state).await {
        Json(LiveResponse { status: "ready" }).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(LiveResponse { status: "not_ready" }),
        )
            .into_response()
    }
}

async fn database_connected(state: &AppState) -> bool {
    match state.db_proxy() {
        Some(proxy) => proxy.ping().await.is_ok(),
        None => false,
    }
}

fn now_iso() -> String {
    DateTime::<Utc>::from(std::time::SystemTime::now()).to_rfc3339_opts(SecondsFormat::Millis, true)
}
