//! 词书本地存储与回收站
//!
//! 删除词书先进入回收站，保留 30 天后在加载或展示回收站时被清除，
//! 没有后台定时器。远端拉取时同 ID 词书整体以远端为准。

use chrono::{DateTime, Duration, Utc};

use crate::kv::KvStore;
use crate::models::{is_expired, Wordbook, WordbookRecord, TRASH_RETENTION_DAYS};
use crate::{StoreError, StoreResult};

const WORDBOOKS_KEY: &str = "wordbooks";

/// 词书存储
pub struct WordbookStore {
    kv: KvStore,
    user_id: String,
    records: Vec<WordbookRecord>,
}

impl WordbookStore {
    /// 从键值存储加载（含旧键迁移），加载时顺带清理过期回收站记录
    pub fn load(kv: KvStore, user_id: &str) -> StoreResult<Self> {
        let records: Vec<WordbookRecord> = match kv.load_namespaced(user_id, WORDBOOKS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };

        let mut store = Self {
            kv,
            user_id: user_id.to_string(),
            records,
        };
        store.purge_expired(Utc::now())?;
        Ok(store)
    }

    /// 活跃词书列表
    pub fn active(&self) -> Vec<&Wordbook> {
        self.records
            .iter()
            .filter_map(|record| match record {
                WordbookRecord::Active { book } => Some(book),
                WordbookRecord::Trashed { .. } => None,
            })
            .collect()
    }

    /// 回收站列表（展示前先清理过期记录）
    pub fn trashed(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<(Wordbook, DateTime<Utc>)>> {
        self.purge_expired(now)?;

        Ok(self
            .records
            .iter()
            .filter_map(|record| match record {
                WordbookRecord::Trashed { book, deleted_at } => {
                    Some((book.clone(), *deleted_at))
                }
                WordbookRecord::Active { .. } => None,
            })
            .collect())
    }

    /// 按 ID 查找活跃词书
    pub fn get(&self, book_id: &str) -> Option<&Wordbook> {
        self.records.iter().find_map(|record| match record {
            WordbookRecord::Active { book } if book.id == book_id => Some(book),
            _ => None,
        })
    }

    /// 插入或覆盖一本活跃词书
    pub fn upsert(&mut self, book: Wordbook) -> StoreResult<()> {
        match self.records.iter_mut().find(|r| r.book().id == book.id) {
            Some(record) => *record.book_mut() = book,
            None => self.records.push(WordbookRecord::Active { book }),
        }
        self.persist()
    }

    /// 移入回收站
    ///
    /// # Returns
    /// * `bool` - 词书存在且处于活跃状态时为 true
    pub fn move_to_trash(&mut self, book_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|r| matches!(r, WordbookRecord::Active { book } if book.id == book_id))
        else {
            return Ok(false);
        };

        let WordbookRecord::Active { book } = record.clone() else {
            return Ok(false);
        };
        *record = WordbookRecord::Trashed {
            book,
            deleted_at: now,
        };
        self.persist()?;
        Ok(true)
    }

    /// 从回收站恢复
    pub fn restore(&mut self, book_id: &str) -> StoreResult<bool> {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|r| matches!(r, WordbookRecord::Trashed { book, .. } if book.id == book_id))
        else {
            return Ok(false);
        };

        let WordbookRecord::Trashed { book, .. } = record.clone() else {
            return Ok(false);
        };
        *record = WordbookRecord::Active { book };
        self.persist()?;
        Ok(true)
    }

    /// 清除过期回收站记录，返回清除数量
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> StoreResult<usize> {
        let retention = Duration::days(TRASH_RETENTION_DAYS);
        let before = self.records.len();

        self.records.retain(|record| match record {
            WordbookRecord::Active { .. } => true,
            WordbookRecord::Trashed { deleted_at, .. } => !is_expired(*deleted_at, now, retention),
        });

        let purged = before - self.records.len();
        if purged > 0 {
            self.persist()?;
        }
        Ok(purged)
    }

    /// 合并远端词书列表，同 ID 整体以远端为准，缺失的插入为活跃词书
    pub fn merge_remote(&mut self, remote_books: Vec<Wordbook>) -> StoreResult<usize> {
        let merged = remote_books.len();

        for book in remote_books {
            match self.records.iter_mut().find(|r| r.book().id == book.id) {
                Some(record) => *record.book_mut() = book,
                None => self.records.push(WordbookRecord::Active { book }),
            }
        }

        self.persist()?;
        Ok(merged)
    }

    fn persist(&self) -> StoreResult<()> {
        let encoded = serde_json::to_string(&self.records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv
            .set(&KvStore::namespaced(&self.user_id, WORDBOOKS_KEY), &encoded)
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str, title: &str) -> Wordbook {
        Wordbook {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: None,
            target_passes: 1,
            is_template: false,
            words: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn store() -> WordbookStore {
        WordbookStore::load(KvStore::in_memory().unwrap(), "u-1").unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let mut store = store();
        store.upsert(book("b-1", "高考词汇")).unwrap();

        assert_eq!(store.get("b-1").unwrap().title, "高考词汇");
        assert_eq!(store.active().len(), 1);

        store.upsert(book("b-1", "高考核心词汇")).unwrap();
        assert_eq!(store.get("b-1").unwrap().title, "高考核心词汇");
        assert_eq!(store.active().len(), 1);
    }

    #[test]
    fn test_trash_and_restore() {
        let mut store = store();
        store.upsert(book("b-1", "雅思词汇")).unwrap();

        assert!(store.move_to_trash("b-1", Utc::now()).unwrap());
        assert!(store.get("b-1").is_none());
        assert_eq!(store.trashed(Utc::now()).unwrap().len(), 1);

        // 回收站中的词书不能重复删除
        assert!(!store.move_to_trash("b-1", Utc::now()).unwrap());

        assert!(store.restore("b-1").unwrap());
        assert_eq!(store.get("b-1").unwrap().title, "雅思词汇");
        assert!(store.trashed(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_expired_trash_is_purged_on_listing() {
        let mut store = store();
        store.upsert(book("b-1", "过期词书")).unwrap();
        store.upsert(book("b-2", "新近删除")).unwrap();

        let now = Utc::now();
        store
            .move_to_trash("b-1", now - Duration::days(31))
            .unwrap();
        store.move_to_trash("b-2", now - Duration::days(1)).unwrap();

        let trash = store.trashed(now).unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].0.id, "b-2");
    }

    #[test]
    fn test_expired_trash_is_purged_on_load() {
        let kv = KvStore::in_memory().unwrap();

        {
            let mut store = WordbookStore::load(kv.clone(), "u-1").unwrap();
            store.upsert(book("b-1", "旧词书")).unwrap();
            store
                .move_to_trash("b-1", Utc::now() - Duration::days(45))
                .unwrap();
        }

        let mut store = WordbookStore::load(kv, "u-1").unwrap();
        assert!(store.trashed(Utc::now()).unwrap().is_empty());
        assert!(store.active().is_empty());
    }

    #[test]
    fn test_merge_remote_overwrites_local_fields() {
        let mut store = store();
        store.upsert(book("b-1", "本地改过的标题")).unwrap();

        store.merge_remote(vec![book("b-1", "远端标题")]).unwrap();

        // 远端为准，本地编辑被覆盖
        assert_eq!(store.get("b-1").unwrap().title, "远端标题");
    }

    #[test]
    fn test_merge_remote_inserts_unknown_books() {
        let mut store = store();
        store
            .merge_remote(vec![book("b-1", "新下发"), book("b-2", "另一本")])
            .unwrap();
        assert_eq!(store.active().len(), 2);
    }

    #[test]
    fn test_persists_across_reload() {
        let kv = KvStore::in_memory().unwrap();

        {
            let mut store = WordbookStore::load(kv.clone(), "u-1").unwrap();
            store.upsert(book("b-1", "考研词汇")).unwrap();
        }

        let store = WordbookStore::load(kv, "u-1").unwrap();
        assert_eq!(store.get("b-1").unwrap().title, "考研词汇");
    }
}
