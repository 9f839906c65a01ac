use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use thiserror::Error;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub role: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("missing JWT_SECRET")]
    MissingSecret,
    #[error("database error: {0}")]
    Database(String),
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|value| value.to_string())
}

/// 每次请求都回源校验令牌，服务端不缓存会话
pub async fn verify_request_token(
    proxy: &DatabaseProxy,
    token: &str,
) -> Result<AuthUser, AuthError> {
    let secret = std::env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)?;
    let claims = verify_jwt_hs256(token, &secret)?;

    let token_hash = hash_token(token);

    verify_with_store(proxy, &claims.user_id, &token_hash).await
}

#[derive(Debug, Clone)]
struct JwtClaims {
    user_id: String,
}

fn verify_jwt_hs256(token: &str, secret: &str) -> Result<JwtClaims, AuthError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let payload_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    let sig_b64 = parts.next().ok_or(AuthError::InvalidToken)?;
    if parts.next().is_some() {
        return Err(AuthError::InvalidToken);
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64.as_bytes())
        .map_err(|_| AuthError::InvalidToken)?;

    let header_json: serde_json::Value =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::InvalidToken)?;
    let alg = header_json
        .get("alg")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::InvalidToken)?;
    if alg != "HS256" {
        return Err(AuthError::InvalidToken);
    }

    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidToken)?;
    mac.update(format!("{header_b64}.{payload_b64}").as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| AuthError::InvalidToken)?;

    let payload_json: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidToken)?;

    validate_registered_claims(&payload_json)?;

    let user_id = payload_json
        .get("userId")
        .and_then(|value| value.as_str())
        .ok_or(AuthError::InvalidToken)?
        .to_string();

    Ok(JwtClaims { user_id })
}

fn validate_registered_claims(payload: &serde_json::Value) -> Result<(), AuthError> {
    let now = Utc::now().timestamp();

    if let Some(exp) = payload.get("exp").and_then(|value| value.as_i64()) {
        if now >= exp {
            return Err(AuthError::InvalidToken);
        }
    }

    if let Some(nbf) = payload.get("nbf").and_then(|value| value.as_i64()) {
        if now < nbf {
            return Err(AuthError::InvalidToken);
        }
    }

    Ok(())
}

fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

pub fn hash_token(token: &str) -> String {
    sha256_hex(token)
}

pub fn format_naive_datetime_iso_millis(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn verify_with_store(
    proxy: &DatabaseProxy,
    expected_user_id: &str,
    token_hash: &str,
) -> Result<AuthUser, AuthError> {
    let pool = proxy.pool();

    let session_row = sqlx::query(
        r#"
        SELECT "userId", "expiresAt"
        FROM "sessions"
        WHERE "token" = $1
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
    .map_err(|err| AuthError::Database(err.to_string()))?;

    let Some(session_row) = session_row else {
        return Err(AuthError::InvalidToken);
    };

    let session_user_id: String = session_row
        .try_get("userId")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let session_expires_at: NaiveDateTime = session_row
        .try_get("expiresAt")
        .map_err(|err| AuthError::Database(err.to_string()))?;

    if session_user_id != expected_user_id {
        return Err(AuthError::InvalidToken);
    }

    let now = Utc::now().naive_utc();
    if session_expires_at < now {
        return Err(AuthError::InvalidToken);
    }

    let user_row = sqlx::query(
        r#"
        SELECT "id", "email", "username", "role", "createdAt", "updatedAt"
        FROM "users"
        WHERE "id" = $1
        "#,
    )
    .bind(expected_user_id)
    .fetch_optional(pool)
    .await
    .map_err(|err| AuthError::Database(err.to_string()))?;

    let Some(user_row) = user_row else {
        return Err(AuthError::InvalidToken);
    };

    let id: String = user_row
        .try_get("id")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let email: String = user_row
        .try_get("email")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let username: String = user_row
        .try_get("username")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let role: String = user_row
        .try_get("role")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let created_at: NaiveDateTime = user_row
        .try_get("createdAt")
        .map_err(|err| AuthError::Database(err.to_string()))?;
    let updated_at: NaiveDateTime = user_row
        .try_get("updatedAt")
        .map_err(|err| AuthError::Database(err.to_string()))?;

    Ok(AuthUser {
        id,
        email,
        username,
        role,
        created_at: naive_datetime_to_ms(created_at),
        updated_at: naive_datetime_to_ms(updated_at),
    })
}

fn naive_datetime_to_ms(value: NaiveDateTime) -> i64 {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc).timestamp_millis()
}
