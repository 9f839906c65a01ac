//! 本地键值存储
//!
//! 所有客户端状态以 JSON 文本存放在一张扁平的键值表里。
//! 键按用户命名空间划分（`<userId>/<leaf>`），切换账号互不泄漏；
//! 早期版本未分命名空间的旧键会在首次读取时迁移到新键并删除。

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::{StoreError, StoreResult};

/// 键值存储
///
/// 基于 SQLite 的扁平键值表，每次写入同步落盘。
#[derive(Clone)]
pub struct KvStore {
    conn: Arc<Mutex<Connection>>,
}

impl KvStore {
    /// 打开（或创建）文件数据库
    ///
    /// 自动启用 WAL 模式并建表。
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let connection = Connection::open(db_path)?;

        // 启用 WAL 模式以提高并发性能
        connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        Self::from_connection(connection)
    }

    /// 创建内存数据库（用于测试）
    pub fn in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> StoreResult<Self> {
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockError(e.to_string()))
    }

    /// 读取键值
    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;

        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 写入键值（插入或覆盖）
    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;

        Ok(())
    }

    /// 删除键
    ///
    /// # Returns
    /// * `bool` - 是否存在并删除了记录
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        let conn = self.lock()?;

        let affected = conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;

        Ok(affected > 0)
    }

    /// 拼接用户命名空间键
    pub fn namespaced(user_id: &str, leaf: &str) -> String {
        format!("{user_id}/{leaf}")
    }

    /// 读取用户命名空间下的键，必要时迁移旧键
    ///
    /// 优先读取 `<userId>/<leaf>`；不存在时若发现未分命名空间的旧键
    /// `<leaf>`，将其内容拷贝到命名空间键并删除旧键后返回。
    pub fn load_namespaced(&self, user_id: &str, leaf: &str) -> StoreResult<Option<String>> {
        let key = Self::namespaced(user_id, leaf);

        if let Some(value) = self.get(&key)? {
            return Ok(Some(value));
        }

        // 旧键迁移：拷贝到命名空间键后删除
        if let Some(legacy) = self.get(leaf)? {
            self.set(&key, &legacy)?;
            self.delete(leaf)?;
            return Ok(Some(legacy));
        }

        Ok(None)
    }
}

// ============================================================
// 测试
// ============================================================
