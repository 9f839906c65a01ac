use chrono::Utc;
use serde::Serialize;
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionProgressPayload {
    pub word_book_id: String,
    pub completed_pages: i32,
    pub completed_passes: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum SectionProgressError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// 列出本人全部词书进度
pub async fn list_section_progress(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<SectionProgressPayload>, SectionProgressError> {
    let rows = sqlx::query(
        r#"
        SELECT "wordBookId", "completedPages", "completedPasses"
        FROM "section_progress"
        WHERE "userId" = $1
        ORDER BY "wordBookId" ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(SectionProgressPayload {
                word_book_id: row.try_get("wordBookId")?,
                completed_pages: row.try_get("completedPages")?,
                completed_passes: row.try_get("completedPasses")?,
            })
        })
        .collect()
}

/// 按 (用户, 词书) 覆盖进度
///
/// 词书必须存在且为本人所有或模板词书。
pub async fn upsert_section_progress(
    proxy: &DatabaseProxy,
    user_id: &str,
    word_book_id: &str,
    completed_pages: i32,
    completed_passes: i32,
) -> Result<SectionProgressPayload, SectionProgressError> {
    if word_book_id.trim().is_empty() {
        return Err(SectionProgressError::Validation(
            "词书ID不能为空".to_string(),
        ));
    }
    if completed_pages < 0 || completed_passes < 0 {
        return Err(SectionProgressError::Validation(
            "进度计数不能为负数".to_string(),
        ));
    }

    let pool = proxy.pool();

    let book_row = sqlx::query(
        r#"SELECT "userId", "isTemplate" FROM "word_books" WHERE "id" = $1"#,
    )
    .bind(word_book_id)
    .fetch_optional(pool)
    .await?;

    let Some(book_row) = book_row else {
        return Err(SectionProgressError::NotFound("词书不存在".to_string()));
    };

    let owner: Option<String> = book_row.try_get("userId")?;
    let is_template: bool = book_row.try_get("isTemplate")?;
    if !is_template && owner.as_deref() != Some(user_id) {
        return Err(SectionProgressError::Forbidden(
            "无权记录此词书的进度".to_string(),
        ));
    }

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO "section_progress"
          ("userId", "wordBookId", "completedPages", "completedPasses", "updatedAt")
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ("userId", "wordBookId") DO UPDATE
        SET "completedPages" = EXCLUDED."completedPages",
            "completedPasses" = EXCLUDED."completedPasses",
            "updatedAt" = EXCLUDED."updatedAt"
        "#,
    )
    .bind(user_id)
    .bind(word_book_id)
    .bind(completed_pages)
    .bind(completed_passes)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(SectionProgressPayload {
        word_book_id: word_book_id.to_string(),
        completed_pages,
        completed_passes,
    })
}
