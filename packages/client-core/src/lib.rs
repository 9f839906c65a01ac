//! 客户端本地存储与同步核心
//!
//! 提供背词进度的本地持久化与云端同步能力，包括：
//! - 分页阅读进度状态机（页 / 遍计数）
//! - 单词遮挡状态（可见性）管理
//! - 词书本地存储与回收站
//! - 与云端的拉取 / 推送同步

// ============================================================
// 子模块声明
// ============================================================

pub mod api;
pub mod daily;
pub mod kv;
pub mod models;
pub mod progress;
pub mod sync;
pub mod visibility;
pub mod wordbooks;

// ============================================================
// 重新导出主要类型
// ============================================================

pub use api::{ApiClient, ApiConfig};
pub use daily::DailyProgressStore;
pub use kv::KvStore;
pub use models::{DailyProgressRecord, UserProfile, WordEntry, Wordbook, WordbookRecord};
pub use progress::{ProgressState, ProgressStore, PAGE_SIZE};
pub use sync::{PullOutcome, PushOutcome, RemoteStore, SyncCoordinator, SyncError};
pub use visibility::{VisibilityFlags, VisibilityStore};
pub use wordbooks::WordbookStore;

use thiserror::Error;

// ============================================================
// 错误类型定义
// ============================================================

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("数据未找到: {0}")]
    NotFound(String),

    #[error("锁获取失败: {0}")]
    LockError(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
