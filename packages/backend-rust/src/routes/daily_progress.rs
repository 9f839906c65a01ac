use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::json_error;
use crate::services::daily_progress::{self, DailyProgressError};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertDailyRequest {
    date: String,
    words_learned: i32,
}

pub async fn list_records(
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

    match daily_progress::list_daily_records(proxy.as_ref(), &user.id).await {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "daily progress query failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}

pub async fn upsert_record(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: UpsertDailyRequest = match serde_json::from_slice(&body_bytes) {
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

    match daily_progress::upsert_daily_record(
        proxy.as_ref(),
        &user.id,
        &payload.date,
        payload.words_learned,
    )
    .await
    {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(DailyProgressError::Validation(message)) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "daily progress upsert failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}
