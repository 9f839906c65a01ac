use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::json_error;
use crate::services::section_progress::{self, SectionProgressError};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertProgressRequest {
    word_book_id: String,
    completed_pages: i32,
    completed_passes: i32,
}

pub async fn list_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    let Some(proxy) = state.db_proxy() else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "服务不可用",
        )
        .into_response();
    };

    match section_progress::list_section_progress(proxy.as_ref(), &user.id).await {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "section progress query failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}

pub async fn upsert_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: UpsertProgressRequest = match serde_json::from_slice(&body_bytes) {
        Ok(value) => value,
        Err(_) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "请求参数不合法",
            )
            .into_response()
        }
    };

    let Some(proxy) = state.db_proxy() else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "服务不可用",
        )
        .into_response();
    };

    match section_progress::upsert_section_progress(
        proxy.as_ref(),
        &user.id,
        &payload.word_book_id,
        payload.completed_pages,
        payload.completed_passes,
    )
    .await
    {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(SectionProgressError::Validation(message)) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        Err(SectionProgressError::Forbidden(message)) => {
            json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message).into_response()
        }
        Err(SectionProgressError::NotFound(message)) => {
            json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "section progress upsert failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}
