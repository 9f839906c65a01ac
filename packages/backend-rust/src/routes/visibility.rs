use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::json_error;
use crate::services::visibility::{self, VisibilityError, VisibilityInput};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchResult {
    written: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisibilityEntryRequest {
    word_entry_id: String,
    show_word: bool,
    show_meaning: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    entries: Vec<VisibilityEntryRequest>,
}

pub async fn list_visibility(
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

    match visibility::list_visibility(proxy.as_ref(), &user.id).await {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "visibility query failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}

pub async fn upsert_batch(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: BatchRequest = match serde_json::from_slice(&body_bytes) {
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

    let entries: Vec<VisibilityInput> = payload
        .entries
        .into_iter()
        .map(|entry| VisibilityInput {
            word_entry_id: entry.word_entry_id,
            show_word: entry.show_word,
            show_meaning: entry.show_meaning,
        })
        .collect();

    let Some(proxy) = state.db_proxy() else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "服务不可用",
        )
        .into_response();
    };

    match visibility::upsert_visibility_batch(proxy.as_ref(), &user.id, entries).await {
        Ok(written) => Json(SuccessResponse {
            success: true,
            data: BatchResult { written },
        })
        .into_response(),
        Err(VisibilityError::Validation(message)) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        Err(VisibilityError::Forbidden(message)) => {
            json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "visibility batch upsert failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}
