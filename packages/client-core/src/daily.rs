//! 每日学习量存储
//!
//! 按日期累加当天学过的单词数，推送时整体上报。

use std::collections::BTreeMap;

use crate::kv::KvStore;
use crate::models::DailyProgressRecord;
use crate::{StoreError, StoreResult};

const DAILY_KEY: &str = "dailyProgress";

/// 每日学习量存储
pub struct DailyProgressStore {
    kv: KvStore,
    user_id: String,
    records: BTreeMap<String, i64>,
}

impl DailyProgressStore {
    /// 从键值存储加载（含旧键迁移）
    pub fn load(kv: KvStore, user_id: &str) -> StoreResult<Self> {
        let records = match kv.load_namespaced(user_id, DAILY_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            kv,
            user_id: user_id.to_string(),
            records,
        })
    }

    /// 累加某天的学习量
    ///
    /// # Arguments
    /// * `date` - `yyyy-MM-dd` 格式日期
    /// * `count` - 本次新增的单词数
    pub fn record_words_learned(&mut self, date: &str, count: i64) -> StoreResult<i64> {
        let total = self.records.entry(date.to_string()).or_insert(0);
        *total += count;
        let updated = *total;
        self.persist()?;
        Ok(updated)
    }

    /// 某天的累计学习量
    pub fn words_learned(&self, date: &str) -> i64 {
        self.records.get(date).copied().unwrap_or(0)
    }

    /// 全部记录快照（按日期排序）
    pub fn snapshot(&self) -> Vec<DailyProgressRecord> {
        self.records
            .iter()
            .map(|(date, words_learned)| DailyProgressRecord {
                date: date.clone(),
                words_learned: *words_learned,
            })
            .collect()
    }

    fn persist(&self) -> StoreResult<()> {
        let encoded = serde_json::to_string(&self.records)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv
            .set(&KvStore::namespaced(&self.user_id, DAILY_KEY), &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_additively() {
        let mut store = DailyProgressStore::load(KvStore::in_memory().unwrap(), "u-1").unwrap();

        assert_eq!(store.record_words_learned("2025-03-01", 5).unwrap(), 5);
        assert_eq!(store.record_words_learned("2025-03-01", 3).unwrap(), 8);
        assert_eq!(store.words_learned("2025-03-01"), 8);
        assert_eq!(store.words_learned("2025-03-02"), 0);
    }

    #[test]
    fn test_snapshot_sorted_by_date() {
        let mut store = DailyProgressStore::load(KvStore::in_memory().unwrap(), "u-1").unwrap();
        store.record_words_learned("2025-03-02", 2).unwrap();
        store.record_words_learned("2025-03-01", 1).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].date, "2025-03-01");
        assert_eq!(snapshot[1].date, "2025-03-02");
    }

    #[test]
    fn test_persists_across_reload() {
        let kv = KvStore::in_memory().unwrap();

        {
            let mut store = DailyProgressStore::load(kv.clone(), "u-1").unwrap();
            store.record_words_learned("2025-03-01", 7).unwrap();
        }

        let store = DailyProgressStore::load(kv, "u-1").unwrap();
        assert_eq!(store.words_learned("2025-03-01"), 7);
    }
}
