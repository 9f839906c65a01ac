//! 单词遮挡状态存储
//!
//! 每个单词条目可以分别遮住单词或释义。未存储的条目语义上即
//! "完全可见"，两个开关都回到可见时记录被立即删除以节省空间。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::models::Wordbook;
use crate::{StoreError, StoreResult};

const VISIBILITY_KEY: &str = "entryVisibility";

/// 单个条目的可见性开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityFlags {
    pub show_word: bool,
    pub show_meaning: bool,
}

impl Default for VisibilityFlags {
    fn default() -> Self {
        Self {
            show_word: true,
            show_meaning: true,
        }
    }
}

impl VisibilityFlags {
    /// 完全可见即隐式默认值，不落盘
    pub fn is_default(&self) -> bool {
        self.show_word && self.show_meaning
    }
}

/// 遮挡状态存储
///
/// 每个已登录会话各持有一个实例；变更后同步落盘，批量操作合并为
/// 一次写入。
pub struct VisibilityStore {
    kv: KvStore,
    user_id: String,
    entries: HashMap<String, VisibilityFlags>,
}

impl VisibilityStore {
    /// 从键值存储加载（含旧键迁移）
    pub fn load(kv: KvStore, user_id: &str) -> StoreResult<Self> {
        let entries = match kv.load_namespaced(user_id, VISIBILITY_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => HashMap::new(),
        };

        Ok(Self {
            kv,
            user_id: user_id.to_string(),
            entries,
        })
    }

    pub fn is_word_visible(&self, entry_id: &str) -> bool {
        self.flags(entry_id).show_word
    }

    pub fn is_meaning_visible(&self, entry_id: &str) -> bool {
        self.flags(entry_id).show_meaning
    }

    fn flags(&self, entry_id: &str) -> VisibilityFlags {
        self.entries.get(entry_id).copied().unwrap_or_default()
    }

    /// 切换单词遮挡
    pub fn toggle_word(&mut self, entry_id: &str) -> StoreResult<VisibilityFlags> {
        let mut flags = self.flags(entry_id);
        flags.show_word = !flags.show_word;
        self.store_flags(entry_id, flags);
        self.persist()?;
        Ok(flags)
    }

    /// 切换释义遮挡
    pub fn toggle_meaning(&mut self, entry_id: &str) -> StoreResult<VisibilityFlags> {
        let mut flags = self.flags(entry_id);
        flags.show_meaning = !flags.show_meaning;
        self.store_flags(entry_id, flags);
        self.persist()?;
        Ok(flags)
    }

    /// 批量设置一组条目的释义可见性
    ///
    /// 合并为一次落盘，避免逐条写入带来的冗余刷新。
    pub fn set_meaning_visibility(&mut self, visible: bool, entry_ids: &[String]) -> StoreResult<()> {
        for entry_id in entry_ids {
            let mut flags = self.flags(entry_id);
            flags.show_meaning = visible;
            self.store_flags(entry_id, flags);
        }
        self.persist()
    }

    /// 词书编辑后清理已不存在条目的遮挡记录
    ///
    /// 防止孤儿记录无限累积。
    pub fn reconcile(&mut self, previous: &Wordbook, updated: &Wordbook) -> StoreResult<()> {
        let mut changed = false;
        for entry in &previous.words {
            if !updated.words.iter().any(|w| w.id == entry.id)
                && self.entries.remove(&entry.id).is_some()
            {
                changed = true;
            }
        }

        if changed {
            self.persist()?;
        }
        Ok(())
    }

    /// 用远端数据整体覆盖本地状态（默认值照常剔除）
    pub fn replace_all(&mut self, entries: HashMap<String, VisibilityFlags>) -> StoreResult<()> {
        self.entries = entries
            .into_iter()
            .filter(|(_, flags)| !flags.is_default())
            .collect();
        self.persist()
    }

    /// 当前全部非默认记录快照
    pub fn snapshot(&self) -> &HashMap<String, VisibilityFlags> {
        &self.entries
    }

    /// 已存储的记录数（默认值不占空间）
    pub fn stored_len(&self) -> usize {
        self.entries.len()
    }

    fn store_flags(&mut self, entry_id: &str, flags: VisibilityFlags) {
        if flags.is_default() {
            self.entries.remove(entry_id);
        } else {
            self.entries.insert(entry_id.to_string(), flags);
        }
    }

    fn persist(&self) -> StoreResult<()> {
        let encoded = serde_json::to_string(&self.entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv
            .set(&KvStore::namespaced(&self.user_id, VISIBILITY_KEY), &encoded)
    }
}

// ============================================================
// 测试
// ============================================================
