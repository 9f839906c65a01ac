//! 阅读进度状态机
//!
//! 每本词书的进度用两个计数表达：已完成页数与已完成遍数，
//! 多遍复习无需展开成组合状态。翻页只进不退，进度在单遍内单调不减。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::{StoreError, StoreResult};

/// 每页单词数
pub const PAGE_SIZE: usize = 10;

/// 计算总页数，向上取整且至少为 1
pub fn total_pages(word_count: usize) -> u32 {
    if word_count == 0 {
        return 1;
    }
    ((word_count + PAGE_SIZE - 1) / PAGE_SIZE) as u32
}

/// 单本词书的进度状态
///
/// 不变量：`completed_passes <= target_passes`；`completed_pages <=
/// total_pages`；遍数达标时 `completed_pages == total_pages`。
/// 结构性变更（编辑 / 导入）后必须调用 [`ProgressState::clamp`] 恢复不变量。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub completed_pages: u32,
    pub completed_passes: u32,
}

impl ProgressState {
    /// 归一化进度，幂等
    pub fn clamp(&mut self, total_pages: u32, target_passes: u32) {
        self.completed_passes = self.completed_passes.min(target_passes);

        if total_pages == 0 {
            self.completed_pages = 0;
            return;
        }

        self.completed_pages = self.completed_pages.min(total_pages);
        if self.completed_passes >= target_passes {
            // 已读完的词书展示为全页完成
            self.completed_pages = total_pages;
        }
    }

    /// 完成一页后的状态转移
    ///
    /// 读完本遍最后一页时遍数加一；新遍数达标则进入终态（此后调用为
    /// 空操作），否则翻回第一页开始下一遍。单遍内页数只增不减，
    /// 重读已完成页不会回退进度。
    pub fn mark_page_completed(&mut self, total_pages: u32, page_index: u32, target_passes: u32) {
        if total_pages == 0 {
            return;
        }
        if self.completed_passes >= target_passes && self.completed_pages >= total_pages {
            return;
        }

        let next_page = page_index + 1;
        if next_page >= total_pages {
            let new_passes = self.completed_passes + 1;
            if new_passes >= target_passes {
                self.completed_pages = total_pages;
                self.completed_passes = new_passes.min(target_passes);
            } else {
                self.completed_pages = 0;
                self.completed_passes = new_passes;
            }
        } else {
            self.completed_pages = self.completed_pages.max(next_page);
        }
    }

    /// 返回恢复阅读时应展示的页索引
    ///
    /// 遍数已耗尽时停在最后一页，否则停在进度页。消费方不得允许跳到
    /// 该索引之前的未完成页之后（只进不退由 UI 层执行，本字段是唯一
    /// 权威来源）。
    pub fn next_page_index(&self, total_pages: u32, target_passes: u32) -> u32 {
        if total_pages == 0 {
            return 0;
        }
        if self.completed_passes >= target_passes {
            return total_pages - 1;
        }
        self.completed_pages.min(total_pages - 1)
    }
}

// ============================================================
// ProgressStore - 进度存储
// ============================================================

const PROGRESS_KEY: &str = "sectionProgress";

/// 进度存储
///
/// 每个已登录会话各持有一个实例；按词书 ID 索引进度状态，首次读取
/// 惰性返回零值。所有修改经由 `mutate` 边界，变更后同步落盘。
pub struct ProgressStore {
    kv: KvStore,
    user_id: String,
    states: HashMap<String, ProgressState>,
}

impl ProgressStore {
    /// 从键值存储加载（含旧键迁移）
    pub fn load(kv: KvStore, user_id: &str) -> StoreResult<Self> {
        let states = match kv.load_namespaced(user_id, PROGRESS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            None => HashMap::new(),
        };

        Ok(Self {
            kv,
            user_id: user_id.to_string(),
            states,
        })
    }

    /// 读取某词书的进度，缺省为零值
    pub fn progress(&self, book_id: &str) -> ProgressState {
        self.states.get(book_id).copied().unwrap_or_default()
    }

    /// 恢复阅读时应展示的页索引
    pub fn next_page_index(&self, book_id: &str, total_pages: u32, target_passes: u32) -> u32 {
        self.progress(book_id)
            .next_page_index(total_pages, target_passes)
    }

    /// 完成一页，返回更新后的状态
    pub fn mark_page_completed(
        &mut self,
        book_id: &str,
        total_pages: u32,
        page_index: u32,
        target_passes: u32,
    ) -> StoreResult<ProgressState> {
        self.mutate(book_id, |state| {
            state.mark_page_completed(total_pages, page_index, target_passes)
        })
    }

    /// 词书结构变更后归一化进度
    pub fn clamp(
        &mut self,
        book_id: &str,
        total_pages: u32,
        target_passes: u32,
    ) -> StoreResult<ProgressState> {
        self.mutate(book_id, |state| state.clamp(total_pages, target_passes))
    }

    /// 删除某词书的进度（仅在词书被移除时）
    pub fn remove(&mut self, book_id: &str) -> StoreResult<()> {
        self.states.remove(book_id);
        self.persist()
    }

    /// 用远端数据整体覆盖某词书的进度
    pub fn overwrite(&mut self, book_id: &str, state: ProgressState) -> StoreResult<()> {
        self.states.insert(book_id.to_string(), state);
        self.persist()
    }

    /// 当前全部进度快照
    pub fn snapshot(&self) -> &HashMap<String, ProgressState> {
        &self.states
    }

    /// 显式修改边界：应用变更后同步持久化
    fn mutate(
        &mut self,
        book_id: &str,
        f: impl FnOnce(&mut ProgressState),
    ) -> StoreResult<ProgressState> {
        let state = self.states.entry(book_id.to_string()).or_default();
        f(state);
        let updated = *state;
        self.persist()?;
        Ok(updated)
    }

    fn persist(&self) -> StoreResult<()> {
        let encoded = serde_json::to_string(&self.states)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv
            .set(&KvStore::namespaced(&self.user_id, PROGRESS_KEY), &encoded)
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProgressStore {
        ProgressStore::load(KvStore::in_memory().unwrap(), "u-1").unwrap()
    }

    #[test]
    fn test_total_pages_minimum_one() {
        assert_eq!(total_pages(0), 1);
        assert_eq!(total_pages(9), 1);
        assert_eq!(total_pages(10), 1);
        assert_eq!(total_pages(11), 2);
    }

    #[test]
    fn test_default_progress_is_zero() {
        let store = store();
        assert_eq!(store.progress("book-1"), ProgressState::default());
    }

    #[test]
    fn test_mark_page_monotonic_within_pass() {
        let mut state = ProgressState::default();

        state.mark_page_completed(5, 0, 2);
        assert_eq!(state.completed_pages, 1);

        state.mark_page_completed(5, 2, 2);
        assert_eq!(state.completed_pages, 3);

        // 重读第一页不回退
        state.mark_page_completed(5, 0, 2);
        assert_eq!(state.completed_pages, 3);
        assert_eq!(state.completed_passes, 0);
    }

    #[test]
    fn test_pass_completion_resets_pages() {
        let mut state = ProgressState {
            completed_pages: 2,
            completed_passes: 0,
        };

        state.mark_page_completed(3, 2, 2);
        assert_eq!(
            state,
            ProgressState {
                completed_pages: 0,
                completed_passes: 1,
            }
        );
    }

    #[test]
    fn test_final_pass_enters_terminal_state() {
        let mut state = ProgressState {
            completed_pages: 2,
            completed_passes: 1,
        };

        state.mark_page_completed(3, 2, 2);
        assert_eq!(
            state,
            ProgressState {
                completed_pages: 3,
                completed_passes: 2,
            }
        );
    }

    #[test]
    fn test_terminal_state_is_idempotent() {
        let mut state = ProgressState {
            completed_pages: 3,
            completed_passes: 2,
        };

        for page in 0..3 {
            state.mark_page_completed(3, page, 2);
        }

        assert_eq!(state.completed_pages, 3);
        assert_eq!(state.completed_passes, 2);
    }

    #[test]
    fn test_mark_page_ignores_empty_book() {
        let mut state = ProgressState::default();
        state.mark_page_completed(0, 0, 2);
        assert_eq!(state, ProgressState::default());
    }

    #[test]
    fn test_clamp_zero_pages() {
        let mut state = ProgressState {
            completed_pages: 4,
            completed_passes: 5,
        };

        state.clamp(0, 2);
        assert_eq!(
            state,
            ProgressState {
                completed_pages: 0,
                completed_passes: 2,
            }
        );
    }

    #[test]
    fn test_clamp_forces_full_pages_when_finished() {
        let mut state = ProgressState {
            completed_pages: 1,
            completed_passes: 3,
        };

        state.clamp(4, 2);
        assert_eq!(
            state,
            ProgressState {
                completed_pages: 4,
                completed_passes: 2,
            }
        );
    }

    #[test]
    fn test_clamp_idempotent() {
        // 含边界值的粗网格，覆盖 clamp(clamp(x)) == clamp(x)
        for pages in [0u32, 1, 3, 7, 100] {
            for passes in [0u32, 1, 2, 50] {
                for total in [0u32, 1, 4, 10] {
                    for target in [1u32, 2, 5] {
                        let mut once = ProgressState {
                            completed_pages: pages,
                            completed_passes: passes,
                        };
                        once.clamp(total, target);

                        let mut twice = once;
                        twice.clamp(total, target);

                        assert_eq!(once, twice, "clamp 应当幂等: {once:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_next_page_index() {
        let state = ProgressState {
            completed_pages: 2,
            completed_passes: 0,
        };
        assert_eq!(state.next_page_index(5, 2), 2);

        // 遍数耗尽停在最后一页
        let done = ProgressState {
            completed_pages: 5,
            completed_passes: 2,
        };
        assert_eq!(done.next_page_index(5, 2), 4);

        // 页数越界时夹到最后一页
        let over = ProgressState {
            completed_pages: 9,
            completed_passes: 0,
        };
        assert_eq!(over.next_page_index(5, 2), 4);
    }

    #[test]
    fn test_store_persists_on_mutation() {
        let kv = KvStore::in_memory().unwrap();

        {
            let mut store = ProgressStore::load(kv.clone(), "u-1").unwrap();
            store.mark_page_completed("book-1", 3, 0, 2).unwrap();
        }

        let reloaded = ProgressStore::load(kv, "u-1").unwrap();
        assert_eq!(reloaded.progress("book-1").completed_pages, 1);
    }

    #[test]
    fn test_store_namespacing_isolates_users() {
        let kv = KvStore::in_memory().unwrap();

        let mut store_a = ProgressStore::load(kv.clone(), "u-a").unwrap();
        store_a.mark_page_completed("book-1", 3, 0, 2).unwrap();

        let store_b = ProgressStore::load(kv, "u-b").unwrap();
        assert_eq!(store_b.progress("book-1"), ProgressState::default());
    }

    #[test]
    fn test_store_migrates_legacy_key() {
        let kv = KvStore::in_memory().unwrap();

        let mut legacy = HashMap::new();
        legacy.insert(
            "book-1".to_string(),
            ProgressState {
                completed_pages: 2,
                completed_passes: 1,
            },
        );
        kv.set(PROGRESS_KEY, &serde_json::to_string(&legacy).unwrap())
            .unwrap();

        let store = ProgressStore::load(kv.clone(), "u-1").unwrap();
        assert_eq!(store.progress("book-1").completed_passes, 1);
        assert_eq!(kv.get(PROGRESS_KEY).unwrap(), None);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let mut store = store();
        store.mark_page_completed("book-1", 3, 0, 2).unwrap();
        store.remove("book-1").unwrap();
        assert_eq!(store.progress("book-1"), ProgressState::default());
    }
}
