use chrono::Utc;
use serde::Serialize;
use sqlx::Row;

use crate::auth::format_naive_datetime_iso_millis;
use crate::db::DatabaseProxy;

pub const DEFAULT_DISPLAY_NAME: &str = "同学";
pub const DEFAULT_AVATAR_EMOJI: &str = "🙂";
const MAX_DISPLAY_NAME_LEN: usize = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePayload {
    pub display_name: String,
    pub avatar_emoji: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    pub avatar_emoji: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// 读取用户资料，缺省时返回默认值
pub async fn get_profile(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<ProfilePayload, ProfileError> {
    let row = sqlx::query(
        r#"
        SELECT "displayName", "avatarEmoji", "updatedAt"
        FROM "user_profiles"
        WHERE "userId" = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(proxy.pool())
    .await?;

    match row {
        Some(row) => Ok(ProfilePayload {
            display_name: row.try_get("displayName")?,
            avatar_emoji: row.try_get("avatarEmoji")?,
            updated_at: format_naive_datetime_iso_millis(row.try_get("updatedAt")?),
        }),
        None => Ok(ProfilePayload {
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            avatar_emoji: DEFAULT_AVATAR_EMOJI.to_string(),
            updated_at: format_naive_datetime_iso_millis(Utc::now().naive_utc()),
        }),
    }
}

/// 部分更新用户资料（读取-合并-落库）
pub async fn update_profile(
    proxy: &DatabaseProxy,
    user_id: &str,
    input: UpdateProfileInput,
) -> Result<ProfilePayload, ProfileError> {
    let current = get_profile(proxy, user_id).await?;

    let display_name = match input.display_name {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(ProfileError::Validation("昵称不能为空".to_string()));
            }
            if trimmed.chars().count() > MAX_DISPLAY_NAME_LEN {
                return Err(ProfileError::Validation(
                    "昵称不能超过50个字符".to_string(),
                ));
            }
            trimmed
        }
        None => current.display_name,
    };

    let avatar_emoji = match input.avatar_emoji {
        Some(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                return Err(ProfileError::Validation("头像不能为空".to_string()));
            }
            trimmed
        }
        None => current.avatar_emoji,
    };

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO "user_profiles" ("userId", "displayName", "avatarEmoji", "updatedAt")
        VALUES ($1, $2, $3, $4)
        ON CONFLICT ("userId") DO UPDATE
        SET "displayName" = EXCLUDED."displayName",
            "avatarEmoji" = EXCLUDED."avatarEmoji",
            "updatedAt" = EXCLUDED."updatedAt"
        "#,
    )
    .bind(user_id)
    .bind(&display_name)
    .bind(&avatar_emoji)
    .bind(now)
    .execute(proxy.pool())
    .await?;

    Ok(ProfilePayload {
        display_name,
        avatar_emoji,
        updated_at: format_naive_datetime_iso_millis(now),
    })
}
