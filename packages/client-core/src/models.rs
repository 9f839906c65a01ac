//! 客户端数据模型
//!
//! 与后端接口共用 camelCase JSON 字段，本地持久化亦使用同一编码。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 回收站保留天数，到期后在加载 / 展示时被清除
pub const TRASH_RETENTION_DAYS: i64 = 30;

/// 词书中的一个单词条目
///
/// 不可变值对象，归属于词书；同一词书内 `word` 去除首尾空白并转小写后唯一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordEntry {
    pub id: String,
    pub word: String,
    pub meaning: String,
    pub ordinal: i64,
}

/// 词书
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wordbook {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub target_passes: u32,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub words: Vec<WordEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wordbook {
    /// 按固定页大小计算总页数，至少为 1
    pub fn total_pages(&self) -> u32 {
        crate::progress::total_pages(self.words.len())
    }
}

/// 本地词书记录：活跃或在回收站中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum WordbookRecord {
    Active { book: Wordbook },
    Trashed { book: Wordbook, deleted_at: DateTime<Utc> },
}

impl WordbookRecord {
    pub fn book(&self) -> &Wordbook {
        match self {
            WordbookRecord::Active { book } => book,
            WordbookRecord::Trashed { book, .. } => book,
        }
    }

    pub fn book_mut(&mut self) -> &mut Wordbook {
        match self {
            WordbookRecord::Active { book } => book,
            WordbookRecord::Trashed { book, .. } => book,
        }
    }
}

/// 回收站记录是否已过期
pub fn is_expired(deleted_at: DateTime<Utc>, now: DateTime<Utc>, retention: Duration) -> bool {
    now - deleted_at >= retention
}

/// 用户资料（单例，缺省时使用默认值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    pub avatar_emoji: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            display_name: "同学".to_string(),
            avatar_emoji: "🙂".to_string(),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// 每日学习量记录，按 (用户, 日期) 累加
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgressRecord {
    /// 格式严格为 `yyyy-MM-dd`
    pub date: String,
    pub words_learned: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book(word_count: usize) -> Wordbook {
        let words = (0..word_count)
            .map(|i| WordEntry {
                id: format!("w-{i}"),
                word: format!("word{i}"),
                meaning: "释义".to_string(),
                ordinal: i as i64,
            })
            .collect();

        Wordbook {
            id: "book-1".to_string(),
            title: "四级核心词".to_string(),
            subtitle: None,
            target_passes: 2,
            is_template: false,
            words,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(sample_book(0).total_pages(), 1);
        assert_eq!(sample_book(1).total_pages(), 1);
        assert_eq!(sample_book(10).total_pages(), 1);
        assert_eq!(sample_book(11).total_pages(), 2);
        assert_eq!(sample_book(25).total_pages(), 3);
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let retention = Duration::days(TRASH_RETENTION_DAYS);

        assert!(!is_expired(now - Duration::days(29), now, retention));
        assert!(is_expired(now - Duration::days(30), now, retention));
        assert!(is_expired(now - Duration::days(31), now, retention));
    }

    #[test]
    fn test_wordbook_record_roundtrip() {
        let record = WordbookRecord::Trashed {
            book: sample_book(3),
            deleted_at: Utc::now(),
        };

        let encoded = serde_json::to_string(&record).unwrap();
        let decoded: WordbookRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }
}
