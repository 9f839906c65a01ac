//! 同步协调器
//!
//! 负责本地存储与云端的拉取 / 推送，两个方向相互独立且均为幂等：
//! - 拉取：远端整体为准覆盖本地（词书、进度、遮挡状态）
//! - 推送：逐本词书尽力而为，单本失败不阻塞其余
//!
//! 同一方向同一时刻只允许一次在途同步，重复触发静默忽略不排队。
//! 取消（丢弃 future）不做回滚，拉取可安全重跑。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::daily::DailyProgressStore;
use crate::models::Wordbook;
use crate::progress::{ProgressState, ProgressStore};
use crate::visibility::{VisibilityFlags, VisibilityStore};
use crate::wordbooks::WordbookStore;
use crate::StoreError;

/// 同步错误类型
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("服务端错误 ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("本地存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("序列化错误: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

/// 远端某词书的进度记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSectionProgress {
    pub word_book_id: String,
    #[serde(flatten)]
    pub state: ProgressState,
}

/// 远端某条目的遮挡记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVisibility {
    pub word_entry_id: String,
    #[serde(flatten)]
    pub flags: VisibilityFlags,
}

/// 远端存储协作方
///
/// 生产实现是 [`crate::api::ApiClient`]，测试用内存假实现。
/// 传输层（HTTP、快照等）对协调器不可见。
pub trait RemoteStore {
    fn fetch_wordbooks(&self) -> impl std::future::Future<Output = Result<Vec<Wordbook>, SyncError>> + Send;
    /// 按 ID 更新词书；词书在远端不存在时返回 [`SyncError::NotFound`]
    fn update_wordbook(&self, book: &Wordbook) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
    fn create_wordbook(&self, book: &Wordbook) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
    fn fetch_section_progress(&self) -> impl std::future::Future<Output = Result<Vec<RemoteSectionProgress>, SyncError>> + Send;
    fn upsert_section_progress(&self, book_id: &str, state: ProgressState) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
    fn fetch_visibility(&self) -> impl std::future::Future<Output = Result<Vec<RemoteVisibility>, SyncError>> + Send;
    fn upsert_visibility(&self, entries: &[RemoteVisibility]) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
    fn upsert_daily_progress(&self, date: &str, words_learned: i64) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
}

/// 拉取结果
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    /// 已有同向同步在途，本次为空操作
    pub skipped: bool,
    pub books_merged: usize,
    pub progress_merged: usize,
    /// 引用了本地不存在词书的进度记录数（跳过，不视为失败）
    pub progress_skipped: usize,
    pub visibility_merged: usize,
}

impl PullOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// 推送结果，错误收集而不抛出
#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    /// 已有同向同步在途，本次为空操作
    pub skipped: bool,
    pub updated_books: usize,
    pub created_books: usize,
    pub pushed_progress: usize,
    pub pushed_visibility: usize,
    pub pushed_daily: usize,
    pub errors: Vec<String>,
}

impl PushOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // 取消时同样释放在途标记
        self.0.store(false, Ordering::Release);
    }
}

/// 同步协调器
///
/// 每个已登录会话各持有一个实例。
pub struct SyncCoordinator<R> {
    remote: R,
    pull_in_flight: Arc<AtomicBool>,
    push_in_flight: Arc<AtomicBool>,
}

impl<R: RemoteStore> SyncCoordinator<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            pull_in_flight: Arc::new(AtomicBool::new(false)),
            push_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 从云端拉取并覆盖本地状态
    ///
    /// 同 ID 词书远端整体为准；进度记录引用未知词书时跳过并记日志；
    /// 遮挡状态整体覆盖。无部分回滚，失败或取消后可安全重跑。
    pub async fn pull(
        &self,
        books: &mut WordbookStore,
        progress: &mut ProgressStore,
        visibility: &mut VisibilityStore,
    ) -> Result<PullOutcome, SyncError> {
        let Some(_guard) = InFlightGuard::try_acquire(&self.pull_in_flight) else {
            log::debug!("pull already in flight, skipping");
            return Ok(PullOutcome::skipped());
        };

        let mut outcome = PullOutcome::default();

        let remote_books = self.remote.fetch_wordbooks().await?;
        outcome.books_merged = books.merge_remote(remote_books)?;

        for record in self.remote.fetch_section_progress().await? {
            if books.get(&record.word_book_id).is_none() {
                log::warn!(
                    "skipping progress for unknown wordbook {}",
                    record.word_book_id
                );
                outcome.progress_skipped += 1;
                continue;
            }
            progress.overwrite(&record.word_book_id, record.state)?;
            outcome.progress_merged += 1;
        }

        let remote_visibility = self.remote.fetch_visibility().await?;
        outcome.visibility_merged = remote_visibility.len();
        let entries: HashMap<String, VisibilityFlags> = remote_visibility
            .into_iter()
            .map(|record| (record.word_entry_id, record.flags))
            .collect();
        visibility.replace_all(entries)?;

        Ok(outcome)
    }

    /// 将本地状态推送到云端
    ///
    /// 每本词书独立推送：先按 ID 更新，远端不存在（离线新建）则改为
    /// 创建。失败收集进结果，不中断其余推送。
    pub async fn push(
        &self,
        books: &WordbookStore,
        progress: &ProgressStore,
        visibility: &VisibilityStore,
        daily: &DailyProgressStore,
    ) -> PushOutcome {
        let Some(_guard) = InFlightGuard::try_acquire(&self.push_in_flight) else {
            log::debug!("push already in flight, skipping");
            return PushOutcome::skipped();
        };

        let mut outcome = PushOutcome::default();

        for book in books.active() {
            match self.remote.update_wordbook(book).await {
                Ok(()) => outcome.updated_books += 1,
                Err(SyncError::NotFound(_)) => match self.remote.create_wordbook(book).await {
                    Ok(()) => outcome.created_books += 1,
                    Err(err) => outcome.errors.push(format!("词书 {} 创建失败: {err}", book.id)),
                },
                Err(err) => outcome.errors.push(format!("词书 {} 推送失败: {err}", book.id)),
            }
        }

        for (book_id, state) in progress.snapshot() {
            match self.remote.upsert_section_progress(book_id, *state).await {
                Ok(()) => outcome.pushed_progress += 1,
                Err(err) => outcome.errors.push(format!("进度 {book_id} 推送失败: {err}")),
            }
        }

        let entries: Vec<RemoteVisibility> = visibility
            .snapshot()
            .iter()
            .map(|(entry_id, flags)| RemoteVisibility {
                word_entry_id: entry_id.clone(),
                flags: *flags,
            })
            .collect();
        if !entries.is_empty() {
            match self.remote.upsert_visibility(&entries).await {
                Ok(()) => outcome.pushed_visibility = entries.len(),
                Err(err) => outcome.errors.push(format!("遮挡状态推送失败: {err}")),
            }
        }

        for record in daily.snapshot() {
            match self
                .remote
                .upsert_daily_progress(&record.date, record.words_learned)
                .await
            {
                Ok(()) => outcome.pushed_daily += 1,
                Err(err) => outcome
                    .errors
                    .push(format!("每日学习量 {} 推送失败: {err}", record.date)),
            }
        }

        outcome
    }
}

// ============================================================
// 测试
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;
    use crate::models::WordEntry;
    use chrono::Utc;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn book(id: &str, title: &str) -> Wordbook {
        Wordbook {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: None,
            target_passes: 2,
            is_template: false,
            words: vec![WordEntry {
                id: format!("{id}-e1"),
                word: "abandon".to_string(),
                meaning: "放弃".to_string(),
                ordinal: 0,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn stores(kv: &KvStore) -> (WordbookStore, ProgressStore, VisibilityStore, DailyProgressStore) {
        (
            WordbookStore::load(kv.clone(), "u-1").unwrap(),
            ProgressStore::load(kv.clone(), "u-1").unwrap(),
            VisibilityStore::load(kv.clone(), "u-1").unwrap(),
            DailyProgressStore::load(kv.clone(), "u-1").unwrap(),
        )
    }

    /// 内存假远端
    #[derive(Default)]
    struct FakeRemote {
        books: Mutex<Vec<Wordbook>>,
        progress: Mutex<Vec<RemoteSectionProgress>>,
        visibility: Mutex<Vec<RemoteVisibility>>,
        daily: Mutex<Vec<(String, i64)>>,
        fail_update_for: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    impl RemoteStore for FakeRemote {
        async fn fetch_wordbooks(&self) -> Result<Vec<Wordbook>, SyncError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.books.lock().unwrap().clone())
        }

        async fn update_wordbook(&self, book: &Wordbook) -> Result<(), SyncError> {
            if self.fail_update_for.lock().unwrap().contains(&book.id) {
                return Err(SyncError::Api {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            let mut books = self.books.lock().unwrap();
            match books.iter_mut().find(|b| b.id == book.id) {
                Some(existing) => {
                    *existing = book.clone();
                    Ok(())
                }
                None => Err(SyncError::NotFound(book.id.clone())),
            }
        }

        async fn create_wordbook(&self, book: &Wordbook) -> Result<(), SyncError> {
            self.books.lock().unwrap().push(book.clone());
            Ok(())
        }

        async fn fetch_section_progress(&self) -> Result<Vec<RemoteSectionProgress>, SyncError> {
            Ok(self.progress.lock().unwrap().clone())
        }

        async fn upsert_section_progress(
            &self,
            book_id: &str,
            state: ProgressState,
        ) -> Result<(), SyncError> {
            self.progress.lock().unwrap().push(RemoteSectionProgress {
                word_book_id: book_id.to_string(),
                state,
            });
            Ok(())
        }

        async fn fetch_visibility(&self) -> Result<Vec<RemoteVisibility>, SyncError> {
            Ok(self.visibility.lock().unwrap().clone())
        }

        async fn upsert_visibility(&self, entries: &[RemoteVisibility]) -> Result<(), SyncError> {
            self.visibility.lock().unwrap().extend_from_slice(entries);
            Ok(())
        }

        async fn upsert_daily_progress(
            &self,
            date: &str,
            words_learned: i64,
        ) -> Result<(), SyncError> {
            self.daily
                .lock()
                .unwrap()
                .push((date.to_string(), words_learned));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pull_remote_wins_over_local_edit() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, mut progress, mut visibility, _daily) = stores(&kv);

        // 本地离线改名
        books.upsert(book("b-1", "本地改过的标题")).unwrap();

        let remote = FakeRemote::default();
        remote.books.lock().unwrap().push(book("b-1", "远端标题"));

        let coordinator = SyncCoordinator::new(remote);
        let outcome = coordinator
            .pull(&mut books, &mut progress, &mut visibility)
            .await
            .unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.books_merged, 1);
        assert_eq!(books.get("b-1").unwrap().title, "远端标题");
    }

    #[tokio::test]
    async fn test_pull_skips_progress_for_unknown_book() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, mut progress, mut visibility, _daily) = stores(&kv);

        let remote = FakeRemote::default();
        remote.books.lock().unwrap().push(book("b-1", "词书"));
        {
            let mut p = remote.progress.lock().unwrap();
            p.push(RemoteSectionProgress {
                word_book_id: "b-1".to_string(),
                state: ProgressState {
                    completed_pages: 2,
                    completed_passes: 1,
                },
            });
            p.push(RemoteSectionProgress {
                word_book_id: "ghost".to_string(),
                state: ProgressState::default(),
            });
        }

        let coordinator = SyncCoordinator::new(remote);
        let outcome = coordinator
            .pull(&mut books, &mut progress, &mut visibility)
            .await
            .unwrap();

        assert_eq!(outcome.progress_merged, 1);
        assert_eq!(outcome.progress_skipped, 1);
        assert_eq!(progress.progress("b-1").completed_passes, 1);
        assert_eq!(progress.progress("ghost"), ProgressState::default());
    }

    #[tokio::test]
    async fn test_pull_overwrites_visibility() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, mut progress, mut visibility, _daily) = stores(&kv);

        visibility.toggle_word("stale").unwrap();

        let remote = FakeRemote::default();
        remote.visibility.lock().unwrap().push(RemoteVisibility {
            word_entry_id: "e-1".to_string(),
            flags: VisibilityFlags {
                show_word: false,
                show_meaning: true,
            },
        });

        let coordinator = SyncCoordinator::new(remote);
        coordinator
            .pull(&mut books, &mut progress, &mut visibility)
            .await
            .unwrap();

        assert!(visibility.is_word_visible("stale"));
        assert!(!visibility.is_word_visible("e-1"));
    }

    #[tokio::test]
    async fn test_push_falls_back_to_create() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, progress, visibility, daily) = stores(&kv);

        books.upsert(book("b-offline", "离线新建")).unwrap();

        let remote = FakeRemote::default();
        let coordinator = SyncCoordinator::new(remote);
        let outcome = coordinator.push(&books, &progress, &visibility, &daily).await;

        assert_eq!(outcome.updated_books, 0);
        assert_eq!(outcome.created_books, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(
            coordinator.remote.books.lock().unwrap()[0].title,
            "离线新建"
        );
    }

    #[tokio::test]
    async fn test_push_collects_errors_without_blocking_fanout() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, progress, visibility, daily) = stores(&kv);

        books.upsert(book("b-1", "会失败")).unwrap();
        books.upsert(book("b-2", "会成功")).unwrap();

        let remote = FakeRemote::default();
        remote.books.lock().unwrap().push(book("b-1", "旧"));
        remote.books.lock().unwrap().push(book("b-2", "旧"));
        remote
            .fail_update_for
            .lock()
            .unwrap()
            .push("b-1".to_string());

        let coordinator = SyncCoordinator::new(remote);
        let outcome = coordinator.push(&books, &progress, &visibility, &daily).await;

        assert_eq!(outcome.updated_books, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("b-1"));
    }

    #[tokio::test]
    async fn test_push_uploads_progress_visibility_and_daily() {
        let kv = KvStore::in_memory().unwrap();
        let (mut books, mut progress, mut visibility, mut daily) = stores(&kv);

        books.upsert(book("b-1", "词书")).unwrap();
        progress.mark_page_completed("b-1", 3, 0, 2).unwrap();
        visibility.toggle_meaning("e-1").unwrap();
        daily.record_words_learned("2025-03-01", 10).unwrap();

        let remote = FakeRemote::default();
        remote.books.lock().unwrap().push(book("b-1", "词书"));

        let coordinator = SyncCoordinator::new(remote);
        let outcome = coordinator.push(&books, &progress, &visibility, &daily).await;

        assert_eq!(outcome.pushed_progress, 1);
        assert_eq!(outcome.pushed_visibility, 1);
        assert_eq!(outcome.pushed_daily, 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_second_pull_while_in_flight_is_noop() {
        let kv = KvStore::in_memory().unwrap();
        let gate = Arc::new(Notify::new());

        let remote = FakeRemote {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let coordinator = Arc::new(SyncCoordinator::new(remote));

        let background = {
            let coordinator = Arc::clone(&coordinator);
            let kv = kv.clone();
            tokio::spawn(async move {
                let (mut books, mut progress, mut visibility, _daily) = stores(&kv);
                coordinator
                    .pull(&mut books, &mut progress, &mut visibility)
                    .await
            })
        };

        // 等后台拉取占住在途标记
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let (mut books, mut progress, mut visibility, _daily) = stores(&kv);
        let second = coordinator
            .pull(&mut books, &mut progress, &mut visibility)
            .await
            .unwrap();
        assert!(second.skipped);

        gate.notify_one();
        let first = background.await.unwrap().unwrap();
        assert!(!first.skipped);

        // 在途标记释放后可再次拉取
        gate.notify_one();
        let third = coordinator
            .pull(&mut books, &mut progress, &mut visibility)
            .await
            .unwrap();
        assert!(!third.skipped);
    }
}
