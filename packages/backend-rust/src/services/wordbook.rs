use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::auth::format_naive_datetime_iso_millis;
use crate::db::DatabaseProxy;

pub const MAX_LIST_LIMIT: i64 = 500;
pub const DEFAULT_MEANING: &str = "-";
const MAX_TITLE_LEN: usize = 100;
const MAX_SUBTITLE_LEN: usize = 200;
const MAX_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct EntryInput {
    pub id: Option<String>,
    pub word: String,
    pub meaning: Option<String>,
    pub ordinal: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct CreateWordbookInput {
    pub id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub target_passes: Option<i32>,
    pub words: Vec<EntryInput>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateWordbookInput {
    pub title: Option<String>,
    /// 外层 None 表示未提交，内层 None 表示清空
    pub subtitle: Option<Option<String>>,
    pub target_passes: Option<i32>,
    /// 提交时整体替换单词表（三阶段写入）
    pub words: Option<Vec<EntryInput>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    pub id: String,
    pub word: String,
    pub meaning: String,
    pub ordinal: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordbookPayload {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub target_passes: i32,
    pub is_template: bool,
    pub words: Vec<EntryPayload>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub added_count: usize,
    pub duplicate_words: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WordbookError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

// ============================================================
// 去重
// ============================================================

#[derive(Debug, Clone)]
pub struct EntryPlan {
    pub id: Option<String>,
    pub word: String,
    pub meaning: String,
    pub ordinal: i32,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub accepted: Vec<EntryPlan>,
    pub duplicate_words: Vec<String>,
}

/// 归一化：去除首尾空白并转小写，仅用于比较
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// 导入 / 整体替换共用的去重规则
///
/// 候选单词的归一化形式已存在于持久集合或批内更早位置时被拒绝，
/// 首次出现者胜；被拒单词按提交时的原样回报，不视为错误。空释义
/// 回退为占位符，缺省序号按既有数量加批内位置顺延。
pub fn dedup_entries(
    existing: &HashSet<String>,
    batch: Vec<EntryInput>,
    base_ordinal: i32,
) -> Result<DedupOutcome, WordbookError> {
    let mut seen = existing.clone();
    let mut outcome = DedupOutcome::default();

    for input in batch {
        let normalized = normalize_word(&input.word);
        if normalized.is_empty() {
            return Err(WordbookError::Validation("单词拼写不能为空".to_string()));
        }

        if seen.contains(&normalized) {
            outcome.duplicate_words.push(input.word);
            continue;
        }
        seen.insert(normalized);

        let meaning = match input.meaning {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => DEFAULT_MEANING.to_string(),
        };
        let ordinal = input
            .ordinal
            .unwrap_or(base_ordinal + outcome.accepted.len() as i32);

        outcome.accepted.push(EntryPlan {
            id: input.id,
            word: input.word.trim().to_string(),
            meaning,
            ordinal,
        });
    }

    Ok(outcome)
}

// ============================================================
// 查询
// ============================================================

struct BookRow {
    id: String,
    user_id: Option<String>,
    title: String,
    subtitle: Option<String>,
    target_passes: i32,
    is_template: bool,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl BookRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("userId")?,
            title: row.try_get("title")?,
            subtitle: row.try_get("subtitle")?,
            target_passes: row.try_get("targetPasses")?,
            is_template: row.try_get("isTemplate")?,
            created_at: row.try_get("createdAt")?,
            updated_at: row.try_get("updatedAt")?,
        })
    }

    fn into_payload(self, words: Vec<EntryPayload>) -> WordbookPayload {
        WordbookPayload {
            id: self.id,
            title: self.title,
            subtitle: self.subtitle,
            target_passes: self.target_passes,
            is_template: self.is_template,
            words,
            created_at: format_naive_datetime_iso_millis(self.created_at),
            updated_at: format_naive_datetime_iso_millis(self.updated_at),
        }
    }
}

const BOOK_COLUMNS: &str = r#""id", "userId", "title", "subtitle", "targetPasses", "isTemplate", "createdAt", "updatedAt""#;

async fn fetch_book(pool: &PgPool, book_id: &str) -> Result<Option<BookRow>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"SELECT {BOOK_COLUMNS} FROM "word_books" WHERE "id" = $1"#
    ))
    .bind(book_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| BookRow::from_row(&row)).transpose()
}

async fn fetch_entries(
    pool: &PgPool,
    book_ids: &[String],
) -> Result<HashMap<String, Vec<EntryPayload>>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "id", "wordBookId", "word", "meaning", "ordinal"
        FROM "word_entries"
        WHERE "wordBookId" = ANY($1)
        ORDER BY "ordinal" ASC, "id" ASC
        "#,
    )
    .bind(book_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<String, Vec<EntryPayload>> = HashMap::new();
    for row in rows {
        let book_id: String = row.try_get("wordBookId")?;
        grouped.entry(book_id).or_default().push(EntryPayload {
            id: row.try_get("id")?,
            word: row.try_get("word")?,
            meaning: row.try_get("meaning")?,
            ordinal: row.try_get("ordinal")?,
        });
    }
    Ok(grouped)
}

async fn load_payload(pool: &PgPool, book: BookRow) -> Result<WordbookPayload, sqlx::Error> {
    let mut entries = fetch_entries(pool, &[book.id.clone()]).await?;
    let words = entries.remove(&book.id).unwrap_or_default();
    Ok(book.into_payload(words))
}

/// 列出本人词书，可选带上模板词书；limit 上限 500
pub async fn list_wordbooks(
    proxy: &DatabaseProxy,
    user_id: &str,
    include_templates: bool,
    limit: Option<i64>,
) -> Result<Vec<WordbookPayload>, WordbookError> {
    let limit = limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let pool = proxy.pool();

    let rows = sqlx::query(&format!(
        r#"
        SELECT {BOOK_COLUMNS}
        FROM "word_books"
        WHERE "userId" = $1 OR ("isTemplate" = TRUE AND $2)
        ORDER BY "createdAt" ASC
        LIMIT $3
        "#
    ))
    .bind(user_id)
    .bind(include_templates)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let books: Vec<BookRow> = rows
        .iter()
        .map(BookRow::from_row)
        .collect::<Result<_, _>>()?;

    let ids: Vec<String> = books.iter().map(|book| book.id.clone()).collect();
    let mut entries = fetch_entries(pool, &ids).await?;

    Ok(books
        .into_iter()
        .map(|book| {
            let words = entries.remove(&book.id).unwrap_or_default();
            book.into_payload(words)
        })
        .collect())
}

/// 读取单本词书：本人词书或模板词书
pub async fn get_wordbook(
    proxy: &DatabaseProxy,
    user_id: &str,
    book_id: &str,
) -> Result<WordbookPayload, WordbookError> {
    let pool = proxy.pool();

    let book = fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;

    if !book.is_template && book.user_id.as_deref() != Some(user_id) {
        return Err(WordbookError::Forbidden("无权访问此词书".to_string()));
    }

    Ok(load_payload(pool, book).await?)
}

fn validate_title(title: &str) -> Result<String, WordbookError> {
    let title = title.trim().to_string();
    if title.is_empty() {
        return Err(WordbookError::Validation("词书名称不能为空".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(WordbookError::Validation(
            "词书名称不能超过100个字符".to_string(),
        ));
    }
    Ok(title)
}

fn validate_subtitle(subtitle: Option<String>) -> Result<Option<String>, WordbookError> {
    match subtitle {
        Some(value) => {
            if value.chars().count() > MAX_SUBTITLE_LEN {
                return Err(WordbookError::Validation(
                    "词书副标题不能超过200个字符".to_string(),
                ));
            }
            Ok(Some(value.trim().to_string()).filter(|v| !v.is_empty()))
        }
        None => Ok(None),
    }
}

fn validate_target_passes(target_passes: i32) -> Result<i32, WordbookError> {
    if target_passes < 1 {
        return Err(WordbookError::Validation(
            "目标遍数必须不小于1".to_string(),
        ));
    }
    Ok(target_passes)
}

fn validate_batch_size(len: usize) -> Result<(), WordbookError> {
    if len > MAX_BATCH_SIZE {
        return Err(WordbookError::Validation(format!(
            "单次最多提交{MAX_BATCH_SIZE}个单词"
        )));
    }
    Ok(())
}

/// 创建词书，可携带初始单词表（去重后入库）
///
/// 允许调用方自带 ID，离线新建的词书推送时保持同一标识。
pub async fn create_wordbook(
    proxy: &DatabaseProxy,
    user_id: &str,
    input: CreateWordbookInput,
) -> Result<(WordbookPayload, Vec<String>), WordbookError> {
    let title = validate_title(&input.title)?;
    let subtitle = validate_subtitle(input.subtitle)?;
    let target_passes = validate_target_passes(input.target_passes.unwrap_or(1))?;
    validate_batch_size(input.words.len())?;

    let pool = proxy.pool();

    let book_id = match input.id {
        Some(id) if !id.trim().is_empty() => {
            if fetch_book(pool, &id).await?.is_some() {
                return Err(WordbookError::Conflict("词书已存在".to_string()));
            }
            id
        }
        _ => Uuid::new_v4().to_string(),
    };

    let dedup = dedup_entries(&HashSet::new(), input.words, 0)?;

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        INSERT INTO "word_books"
          ("id", "userId", "title", "subtitle", "targetPasses", "isTemplate", "createdAt", "updatedAt")
        VALUES ($1, $2, $3, $4, $5, FALSE, $6, $6)
        "#,
    )
    .bind(&book_id)
    .bind(user_id)
    .bind(&title)
    .bind(&subtitle)
    .bind(target_passes)
    .bind(now)
    .execute(pool)
    .await?;

    insert_entries(pool, &book_id, &dedup.accepted).await?;

    let book = fetch_book(pool, &book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;
    let payload = load_payload(pool, book).await?;

    Ok((payload, dedup.duplicate_words))
}

async fn insert_entries(
    pool: &PgPool,
    book_id: &str,
    plans: &[EntryPlan],
) -> Result<(), sqlx::Error> {
    let now = Utc::now().naive_utc();
    for plan in plans {
        let entry_id = plan
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        sqlx::query(
            r#"
            INSERT INTO "word_entries"
              ("id", "wordBookId", "word", "meaning", "ordinal", "createdAt", "updatedAt")
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(&entry_id)
        .bind(book_id)
        .bind(&plan.word)
        .bind(&plan.meaning)
        .bind(plan.ordinal)
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

fn require_owned(book: &BookRow, user_id: &str, denied: &str) -> Result<(), WordbookError> {
    if book.is_template {
        return Err(WordbookError::Forbidden(format!("无法{denied}模板词书")));
    }
    if book.user_id.as_deref() != Some(user_id) {
        return Err(WordbookError::Forbidden(format!("无权{denied}此词书")));
    }
    Ok(())
}

/// 更新词书：部分字段，或携带 words 触发单词表整体替换
///
/// 整体替换按三阶段顺序写入：先更新携带既有 ID 的条目，再插入新
/// 条目，最后删除不在新列表中的条目。改名保 ID 的条目不会被误判
/// 为先删后插。三阶段之间没有事务包裹，中途失败会留下部分更新。
pub async fn update_wordbook(
    proxy: &DatabaseProxy,
    user_id: &str,
    book_id: &str,
    input: UpdateWordbookInput,
) -> Result<(WordbookPayload, Vec<String>), WordbookError> {
    let pool = proxy.pool();

    let mut book = fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;
    require_owned(&book, user_id, "修改")?;

    if let Some(title) = input.title {
        book.title = validate_title(&title)?;
    }
    if let Some(subtitle) = input.subtitle {
        book.subtitle = validate_subtitle(subtitle)?;
    }
    if let Some(target_passes) = input.target_passes {
        book.target_passes = validate_target_passes(target_passes)?;
    }

    let mut duplicate_words = Vec::new();
    if let Some(words) = input.words {
        validate_batch_size(words.len())?;
        duplicate_words = replace_entries(pool, book_id, words).await?;
    }

    let now = Utc::now().naive_utc();
    sqlx::query(
        r#"
        UPDATE "word_books"
        SET "title" = $2, "subtitle" = $3, "targetPasses" = $4, "updatedAt" = $5
        WHERE "id" = $1
        "#,
    )
    .bind(book_id)
    .bind(&book.title)
    .bind(&book.subtitle)
    .bind(book.target_passes)
    .bind(now)
    .execute(pool)
    .await?;

    let book = fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;
    let payload = load_payload(pool, book).await?;

    Ok((payload, duplicate_words))
}

/// 单词表整体替换的三阶段写入
async fn replace_entries(
    pool: &PgPool,
    book_id: &str,
    words: Vec<EntryInput>,
) -> Result<Vec<String>, WordbookError> {
    let existing_rows = sqlx::query(
        r#"SELECT "id" FROM "word_entries" WHERE "wordBookId" = $1"#,
    )
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    let existing_ids: HashSet<String> = existing_rows
        .iter()
        .map(|row| row.try_get("id"))
        .collect::<Result<_, _>>()?;

    // 整体替换时持久集合即将被换掉，去重只看批内先后
    let dedup = dedup_entries(&HashSet::new(), words, 0)?;

    let mut updates = Vec::new();
    let mut inserts = Vec::new();
    let mut kept_ids = HashSet::new();

    for plan in dedup.accepted {
        match plan.id.as_deref() {
            Some(id) if existing_ids.contains(id) => {
                kept_ids.insert(id.to_string());
                updates.push(plan);
            }
            _ => inserts.push(plan),
        }
    }

    // 阶段一：更新携带既有 ID 的条目
    let now = Utc::now().naive_utc();
    for plan in &updates {
        sqlx::query(
            r#"
            UPDATE "word_entries"
            SET "word" = $2, "meaning" = $3, "ordinal" = $4, "updatedAt" = $5
            WHERE "id" = $1
            "#,
        )
        .bind(plan.id.as_deref())
        .bind(&plan.word)
        .bind(&plan.meaning)
        .bind(plan.ordinal)
        .bind(now)
        .execute(pool)
        .await?;
    }

    // 阶段二：插入新条目
    insert_entries(pool, book_id, &inserts).await?;

    // 阶段三：删除不在新列表中的条目
    let removed: Vec<String> = existing_ids
        .into_iter()
        .filter(|id| !kept_ids.contains(id))
        .collect();
    if !removed.is_empty() {
        sqlx::query(r#"DELETE FROM "word_entries" WHERE "id" = ANY($1)"#)
            .bind(&removed)
            .execute(pool)
            .await?;
    }

    Ok(dedup.duplicate_words)
}

/// 删除词书（远端立即硬删除，关联进度与遮挡记录级联清除）
pub async fn delete_wordbook(
    proxy: &DatabaseProxy,
    user_id: &str,
    book_id: &str,
) -> Result<(), WordbookError> {
    let pool = proxy.pool();

    let book = fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;
    require_owned(&book, user_id, "删除")?;

    sqlx::query(r#"DELETE FROM "word_books" WHERE "id" = $1"#)
        .bind(book_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// 批量导入单词，返回入库数与被拒的重复单词
pub async fn import_entries(
    proxy: &DatabaseProxy,
    user_id: &str,
    book_id: &str,
    words: Vec<EntryInput>,
) -> Result<ImportOutcome, WordbookError> {
    if words.is_empty() {
        return Err(WordbookError::Validation("至少需要一个单词".to_string()));
    }
    validate_batch_size(words.len())?;

    let pool = proxy.pool();

    let book = fetch_book(pool, book_id)
        .await?
        .ok_or_else(|| WordbookError::NotFound("词书不存在".to_string()))?;
    require_owned(&book, user_id, "导入")?;

    let existing_rows = sqlx::query(
        r#"SELECT "word" FROM "word_entries" WHERE "wordBookId" = $1"#,
    )
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    let mut existing = HashSet::new();
    for row in &existing_rows {
        let word: String = row.try_get("word")?;
        existing.insert(normalize_word(&word));
    }
    let base_ordinal = existing_rows.len() as i32;

    let dedup = dedup_entries(&existing, words, base_ordinal)?;
    insert_entries(pool, book_id, &dedup.accepted).await?;

    Ok(ImportOutcome {
        added_count: dedup.accepted.len(),
        duplicate_words: dedup.duplicate_words,
    })
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(word: &str) -> EntryInput {
        EntryInput {
            id: None,
            word: word.to_string(),
            meaning: None,
            ordinal: None,
        }
    }

    #[test]
    fn test_dedup_against_persisted_set_and_batch() {
        // 已有 "run"，导入 ["Abandon", "abandon ", "RUN"]
        let mut existing = HashSet::new();
        existing.insert("run".to_string());

        let outcome = dedup_entries(
            &existing,
            vec![entry("Abandon"), entry("abandon "), entry("RUN")],
            1,
        )
        .unwrap();

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].word, "Abandon");
        // 被拒单词保留提交时的原样
        assert_eq!(outcome.duplicate_words, vec!["abandon ", "RUN"]);
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let outcome = dedup_entries(
            &HashSet::new(),
            vec![entry("Apple"), entry("APPLE"), entry("banana")],
            0,
        )
        .unwrap();

        let words: Vec<&str> = outcome.accepted.iter().map(|p| p.word.as_str()).collect();
        assert_eq!(words, vec!["Apple", "banana"]);
        assert_eq!(outcome.duplicate_words, vec!["APPLE"]);
    }

    #[test]
    fn test_dedup_defaults_meaning_and_ordinal() {
        let outcome = dedup_entries(
            &HashSet::new(),
            vec![
                EntryInput {
                    id: None,
                    word: "apple".to_string(),
                    meaning: Some("  ".to_string()),
                    ordinal: None,
                },
                EntryInput {
                    id: None,
                    word: "banana".to_string(),
                    meaning: Some("香蕉".to_string()),
                    ordinal: Some(99),
                },
            ],
            5,
        )
        .unwrap();

        assert_eq!(outcome.accepted[0].meaning, DEFAULT_MEANING);
        assert_eq!(outcome.accepted[0].ordinal, 5);
        assert_eq!(outcome.accepted[1].meaning, "香蕉");
        assert_eq!(outcome.accepted[1].ordinal, 99);
    }

    #[test]
    fn test_dedup_rejects_blank_word() {
        let result = dedup_entries(&HashSet::new(), vec![entry("   ")], 0);
        assert!(matches!(result, Err(WordbookError::Validation(_))));
    }

    #[test]
    fn test_dedup_trims_stored_word() {
        let outcome = dedup_entries(&HashSet::new(), vec![entry("  Apple  ")], 0).unwrap();
        assert_eq!(outcome.accepted[0].word, "Apple");
    }
}
