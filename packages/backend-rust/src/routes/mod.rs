mod daily_progress;
mod health;
mod profile;
mod section_progress;
mod visibility;
mod wordbooks;

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::middleware::require_auth;
use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/profile",
            get(profile::get_profile).patch(profile::update_profile),
        )
        .route(
            "/progress/daily",
            get(daily_progress::list_records).post(daily_progress::upsert_record),
        )
        .route(
            "/progress/sections",
            get(section_progress::list_progress).post(section_progress::upsert_progress),
        )
        .route(
            "/visibility",
            get(visibility::list_visibility).post(visibility::upsert_batch),
        )
        .route(
            "/wordbooks",
            get(wordbooks::list_wordbooks).post(wordbooks::create_wordbook),
        )
        .route(
            "/wordbooks/:id",
            get(wordbooks::get_wordbook)
                .patch(wordbooks::update_wordbook)
                .delete(wordbooks::delete_wordbook),
        )
        .route("/wordbooks/:id/entries", post(wordbooks::import_entries))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/api", api)
        .nest("/health", health::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "接口不存在").into_response()
}

pub(crate) async fn split_body(
    req: Request<Body>,
) -> Result<(axum::http::request::Parts, Bytes), Response> {
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return Err(
                json_error(StatusCode::BAD_REQUEST, "BODY_TOO_LARGE", "请求体过大").into_response(),
            )
        }
    };
    Ok((parts, body_bytes))
}
