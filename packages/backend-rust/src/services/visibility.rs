use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use sqlx::Row;

use crate::db::DatabaseProxy;

const MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityPayload {
    pub word_entry_id: String,
    pub show_word: bool,
    pub show_meaning: bool,
}

#[derive(Debug, Clone)]
pub struct VisibilityInput {
    pub word_entry_id: String,
    pub show_word: bool,
    pub show_meaning: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// 列出本人全部遮挡记录（只存非默认值）
pub async fn list_visibility(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<VisibilityPayload>, VisibilityError> {
    let rows = sqlx::query(
        r#"
        SELECT "wordEntryId", "showWord", "showMeaning"
        FROM "entry_visibility"
        WHERE "userId" = $1
        ORDER BY "wordEntryId" ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(VisibilityPayload {
                word_entry_id: row.try_get("wordEntryId")?,
                show_word: row.try_get("showWord")?,
                show_meaning: row.try_get("showMeaning")?,
            })
        })
        .collect()
}

/// 批量写入遮挡记录，按 (用户, 条目) 覆盖
///
/// 先校验批内每个条目都属于本人词书或模板词书，任一校验失败则整批
/// 拒绝，不产生任何写入。两个开关都可见的记录直接删除而不存储。
pub async fn upsert_visibility_batch(
    proxy: &DatabaseProxy,
    user_id: &str,
    entries: Vec<VisibilityInput>,
) -> Result<usize, VisibilityError> {
    if entries.is_empty() {
        return Err(VisibilityError::Validation(
            "entries 不能为空".to_string(),
        ));
    }
    if entries.len() > MAX_BATCH_SIZE {
        return Err(VisibilityError::Validation(format!(
            "单次最多提交{MAX_BATCH_SIZE}条记录"
        )));
    }
    if entries
        .iter()
        .any(|entry| entry.word_entry_id.trim().is_empty())
    {
        return Err(VisibilityError::Validation(
            "单词条目ID不能为空".to_string(),
        ));
    }

    let pool = proxy.pool();

    // 所有权校验：整批通过后才允许任何写入
    let ids: Vec<String> = entries
        .iter()
        .map(|entry| entry.word_entry_id.clone())
        .collect();

    let allowed_rows = sqlx::query(
        r#"
        SELECT e."id"
        FROM "word_entries" e
        JOIN "word_books" b ON b."id" = e."wordBookId"
        WHERE e."id" = ANY($1) AND (b."userId" = $2 OR b."isTemplate" = TRUE)
        "#,
    )
    .bind(&ids)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let allowed: HashSet<String> = allowed_rows
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<_, _>>()?;

    if let Some(denied) = ids.iter().find(|id| !allowed.contains(*id)) {
        return Err(VisibilityError::Forbidden(format!(
            "无权操作单词条目 {denied}"
        )));
    }

    let now = Utc::now().naive_utc();
    let mut written = 0;
    for entry in entries {
        if entry.show_word && entry.show_meaning {
            // 完全可见是隐式默认值，删除而非存储
            sqlx::query(
                r#"DELETE FROM "entry_visibility" WHERE "userId" = $1 AND "wordEntryId" = $2"#,
            )
            .bind(user_id)
            .bind(&entry.word_entry_id)
            .execute(pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO "entry_visibility"
                  ("userId", "wordEntryId", "showWord", "showMeaning", "updatedAt")
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT ("userId", "wordEntryId") DO UPDATE
                SET "showWord" = EXCLUDED."showWord",
                    "showMeaning" = EXCLUDED."showMeaning",
                    "updatedAt" = EXCLUDED."updatedAt"
                "#,
            )
            .bind(user_id)
            .bind(&entry.word_entry_id)
            .bind(entry.show_word)
            .bind(entry.show_meaning)
            .bind(now)
            .execute(pool)
            .await?;
        }
        written += 1;
    }

    Ok(written)
}
