use chrono::NaiveDate;
use serde::Serialize;
use sqlx::Row;

use crate::db::DatabaseProxy;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecordPayload {
    pub date: String,
    pub words_learned: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum DailyProgressError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// 日期格式必须严格为 `yyyy-MM-dd`
pub fn is_valid_date(value: &str) -> bool {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        // parse 接受未补零的月份和日期，回写比对排除这类输入
        Ok(parsed) => parsed.format("%Y-%m-%d").to_string() == value,
        Err(_) => false,
    }
}

/// 列出本人全部每日学习量记录
pub async fn list_daily_records(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<Vec<DailyRecordPayload>, DailyProgressError> {
    let rows = sqlx::query(
        r#"
        SELECT "date", "wordsLearned"
        FROM "daily_progress"
        WHERE "userId" = $1
        ORDER BY "date" ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    rows.iter()
        .map(|row| {
            Ok(DailyRecordPayload {
                date: row.try_get("date")?,
                words_learned: row.try_get("wordsLearned")?,
            })
        })
        .collect()
}

/// 按 (用户, 日期) 累加学习量
pub async fn upsert_daily_record(
    proxy: &DatabaseProxy,
    user_id: &str,
    date: &str,
    words_learned: i32,
) -> Result<DailyRecordPayload, DailyProgressError> {
    if !is_valid_date(date) {
        return Err(DailyProgressError::Validation(
            "日期格式必须为yyyy-MM-dd".to_string(),
        ));
    }
    if words_learned < 0 {
        return Err(DailyProgressError::Validation(
            "学习量不能为负数".to_string(),
        ));
    }

    let row = sqlx::query(
        r#"
        INSERT INTO "daily_progress" ("userId", "date", "wordsLearned")
        VALUES ($1, $2, $3)
        ON CONFLICT ("userId", "date") DO UPDATE
        SET "wordsLearned" = "daily_progress"."wordsLearned" + EXCLUDED."wordsLearned"
        RETURNING "wordsLearned"
        "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(words_learned)
    .fetch_one(proxy.pool())
    .await?;

    Ok(DailyRecordPayload {
        date: date.to_string(),
        words_learned: row.try_get("wordsLearned")?,
    })
}
