use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::json_error;
use crate::services::wordbook::{
    self, CreateWordbookInput, EntryInput, UpdateWordbookInput, WordbookError,
};
use crate::state::AppState;

#[derive(Serialize)]
struct SuccessResponse<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WordbookWriteResponse<T> {
    success: bool,
    data: T,
    duplicate_words: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRequest {
    id: Option<String>,
    word: String,
    meaning: Option<String>,
    ordinal: Option<i32>,
}

impl From<EntryRequest> for EntryInput {
    fn from(value: EntryRequest) -> Self {
        EntryInput {
            id: value.id,
            word: value.word,
            meaning: value.meaning,
            ordinal: value.ordinal,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWordbookRequest {
    id: Option<String>,
    title: Option<String>,
    subtitle: Option<String>,
    target_passes: Option<i32>,
    #[serde(default)]
    words: Vec<EntryRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateWordbookRequest {
    title: Option<String>,
    subtitle: Option<Option<String>>,
    target_passes: Option<i32>,
    words: Option<Vec<EntryRequest>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportEntriesRequest {
    #[serde(default)]
    words: Vec<EntryRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    include_templates: Option<bool>,
    limit: Option<i64>,
}

pub async fn list_wordbooks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Response {
    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::list_wordbooks(
        proxy.as_ref(),
        &user.id,
        query.include_templates.unwrap_or(false),
        query.limit,
    )
    .await
    {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => error_response(err, "wordbooks query failed"),
    }
}

pub async fn get_wordbook(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(book_id): Path<String>,
) -> Response {
    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::get_wordbook(proxy.as_ref(), &user.id, &book_id).await {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => error_response(err, "wordbook lookup failed"),
    }
}

pub async fn create_wordbook(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: CreateWordbookRequest = match serde_json::from_slice(&body_bytes) {
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

    let Some(title) = payload.title else {
        return json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "词书名称不能为空")
            .into_response();
    };

    let input = CreateWordbookInput {
        id: payload.id,
        title,
        subtitle: payload.subtitle,
        target_passes: payload.target_passes,
        words: payload.words.into_iter().map(EntryInput::from).collect(),
    };

    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::create_wordbook(proxy.as_ref(), &user.id, input).await {
        Ok((data, duplicate_words)) => (
            StatusCode::CREATED,
            Json(WordbookWriteResponse {
                success: true,
                data,
                duplicate_words,
            }),
        )
            .into_response(),
        Err(err) => error_response(err, "wordbook insert failed"),
    }
}

pub async fn update_wordbook(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(book_id): Path<String>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: UpdateWordbookRequest = match serde_json::from_slice(&body_bytes) {
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

    let input = UpdateWordbookInput {
        title: payload.title,
        subtitle: payload.subtitle,
        target_passes: payload.target_passes,
        words: payload
            .words
            .map(|words| words.into_iter().map(EntryInput::from).collect()),
    };

    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::update_wordbook(proxy.as_ref(), &user.id, &book_id, input).await {
        Ok((data, duplicate_words)) => Json(WordbookWriteResponse {
            success: true,
            data,
            duplicate_words,
        })
        .into_response(),
        Err(err) => error_response(err, "wordbook update failed"),
    }
}

pub async fn delete_wordbook(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(book_id): Path<String>,
) -> Response {
    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::delete_wordbook(proxy.as_ref(), &user.id, &book_id).await {
        Ok(()) => Json(MessageResponse {
            success: true,
            message: "词书删除成功",
        })
        .into_response(),
        Err(err) => error_response(err, "wordbook delete failed"),
    }
}

pub async fn import_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(book_id): Path<String>,
    req: Request<Body>,
) -> Response {
    let (_parts, body_bytes) = match super::split_body(req).await {
        Ok(value) => value,
        Err(res) => return res,
    };

    let payload: ImportEntriesRequest = match serde_json::from_slice(&body_bytes) {
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

    let words: Vec<EntryInput> = payload.words.into_iter().map(EntryInput::from).collect();

    let Some(proxy) = state.db_proxy() else {
        return service_unavailable();
    };

    match wordbook::import_entries(proxy.as_ref(), &user.id, &book_id, words).await {
        Ok(data) => Json(SuccessResponse {
            success: true,
            data,
        })
        .into_response(),
        Err(err) => error_response(err, "entries import failed"),
    }
}

fn service_unavailable() -> Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "SERVICE_UNAVAILABLE",
        "服务不可用",
    )
    .into_response()
}

fn error_response(err: WordbookError, context: &'static str) -> Response {
    match err {
        WordbookError::Validation(message) => {
            json_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message).into_response()
        }
        WordbookError::Forbidden(message) => {
            json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message).into_response()
        }
        WordbookError::NotFound(message) => {
            json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message).into_response()
        }
        WordbookError::Conflict(message) => {
            json_error(StatusCode::CONFLICT, "CONFLICT", message).into_response()
        }
        WordbookError::Sql(sql_err) => {
            tracing::warn!(error = %sql_err, "{context}");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "服务器内部错误",
            )
            .into_response()
        }
    }
}
