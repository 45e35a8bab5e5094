//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Tier2缓存后端：本地SQLite持久化层。
//!
//! Tier2容量更大、速度更慢，存放大值与Critical值，进程重启后仍然有效。
//! 条目数超出配额时写入返回容量错误，由上层降级为仅Tier1。

use crate::cache::Priority;
use crate::clock::Clock;
use crate::config::Tier2Config;
use crate::error::{CacheError, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Tier2缓存条目（读取结果）
#[derive(Debug, Clone)]
pub struct Tier2Entry {
    pub value: Vec<u8>,
    pub stored_at_ms: i64,
    /// 0表示永不过期
    pub ttl_ms: i64,
    pub priority: Priority,
    pub tags: HashSet<String>,
}

impl Tier2Entry {
    /// 相对当前时刻的剩余TTL；None表示永不过期
    pub fn remaining_ttl(&self, now_ms: i64) -> Option<Duration> {
        if self.ttl_ms == 0 {
            return None;
        }
        let remaining = (self.stored_at_ms + self.ttl_ms - now_ms).max(0);
        Some(Duration::from_millis(remaining as u64))
    }
}

/// Tier2缓存后端
pub struct Tier2Backend {
    connection: DatabaseConnection,
    config: Tier2Config,
    clock: Arc<dyn Clock>,
}

impl Tier2Backend {
    /// 创建并初始化Tier2后端
    #[instrument(skip(config, clock), level = "info", fields(conn = %config.connection_string))]
    pub async fn new(config: &Tier2Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut opt = ConnectOptions::new(config.connection_string.clone());
        // 单连接即可：单进程单用户会话，同时规避内存库多连接不共享的问题
        opt.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms));

        let connection = Database::connect(opt)
            .await
            .map_err(|e| CacheError::Tier2Error(format!("failed to open database: {}", e)))?;

        let backend = Self {
            connection,
            config: config.clone(),
            clock,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<()> {
        self.exec_sql(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                stored_at_ms INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                tags TEXT NOT NULL,
                size_bytes INTEGER NOT NULL
            )",
        )
        .await?;
        self.exec_sql(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
             ON cache_entries (stored_at_ms, ttl_ms)",
        )
        .await?;
        Ok(())
    }

    async fn exec_sql(&self, sql: &str) -> Result<()> {
        self.connection
            .execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                sql.to_string(),
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL execution failed: {}", e)))?;
        Ok(())
    }

    /// 读取条目
    ///
    /// 过期条目视为不存在并被立即删除
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> Result<Option<Tier2Entry>> {
        let row = self
            .connection
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "SELECT value, stored_at_ms, ttl_ms, priority, tags
                 FROM cache_entries WHERE key = ?",
                [key.into()],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL query failed: {}", e)))?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let value: Vec<u8> = row
            .try_get("", "value")
            .map_err(|e| CacheError::Tier2Error(e.to_string()))?;
        let stored_at_ms: i64 = row
            .try_get("", "stored_at_ms")
            .map_err(|e| CacheError::Tier2Error(e.to_string()))?;
        let ttl_ms: i64 = row
            .try_get("", "ttl_ms")
            .map_err(|e| CacheError::Tier2Error(e.to_string()))?;
        let priority_rank: i64 = row
            .try_get("", "priority")
            .map_err(|e| CacheError::Tier2Error(e.to_string()))?;
        let tags_json: String = row
            .try_get("", "tags")
            .map_err(|e| CacheError::Tier2Error(e.to_string()))?;

        let now_ms = self.clock.now_millis();
        if ttl_ms > 0 && now_ms >= stored_at_ms + ttl_ms {
            self.delete(key).await?;
            debug!(key, "tier2 entry expired, purged");
            return Ok(None);
        }

        let tags: HashSet<String> = serde_json::from_str(&tags_json)
            .map_err(|e| CacheError::Serialization(format!("tags column: {}", e)))?;

        Ok(Some(Tier2Entry {
            value,
            stored_at_ms,
            ttl_ms,
            priority: Priority::from_rank(priority_rank as u8),
            tags,
        }))
    }

    /// 写入条目
    ///
    /// 新键写入时检查配额，超出返回 [`CacheError::Tier2Capacity`]
    #[instrument(skip(self, value, tags), level = "debug", fields(value_len = value.len()))]
    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        priority: Priority,
        tags: &HashSet<String>,
    ) -> Result<()> {
        if !self.contains(key).await? && self.count().await? >= self.config.max_entries {
            return Err(CacheError::Tier2Capacity(format!(
                "entry quota of {} reached",
                self.config.max_entries
            )));
        }

        let tags_json = serde_json::to_string(tags)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        let ttl_ms = ttl.map(|d| d.as_millis() as i64).unwrap_or(0);
        let size_bytes = (key.len() + value.len()) as i64;

        self.connection
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "INSERT OR REPLACE INTO cache_entries
                 (key, value, stored_at_ms, ttl_ms, priority, tags, size_bytes)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                [
                    key.into(),
                    value.into(),
                    self.clock.now_millis().into(),
                    ttl_ms.into(),
                    (priority.rank() as i64).into(),
                    tags_json.into(),
                    size_bytes.into(),
                ],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL execution failed: {}", e)))?;
        Ok(())
    }

    /// 删除条目，返回是否确有删除
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = self
            .connection
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM cache_entries WHERE key = ?",
                [key.into()],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL execution failed: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// 按标签失效，返回移除的条目数
    ///
    /// tags列是JSON字符串数组，用带引号的LIKE匹配避免前缀误命中；
    /// 标签自身的 `%`/`_`/`\` 需转义，否则会作为通配符吞掉其他行
    #[instrument(skip(self), level = "debug")]
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let needle = serde_json::to_string(tag)
            .map_err(|e| CacheError::Serialization(e.to_string()))?
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{}%", needle);
        let result = self
            .connection
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM cache_entries WHERE tags LIKE ? ESCAPE '\\'",
                [pattern.into()],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// 清除已过期条目，返回清除数量
    #[instrument(skip(self), level = "debug")]
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = self
            .connection
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "DELETE FROM cache_entries WHERE ttl_ms > 0 AND stored_at_ms + ttl_ms <= ?",
                [self.clock.now_millis().into()],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }

    /// 当前条目数
    pub async fn count(&self) -> Result<u64> {
        let row = self
            .connection
            .query_one(Statement::from_string(
                DatabaseBackend::Sqlite,
                "SELECT COUNT(*) AS cnt FROM cache_entries".to_string(),
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL query failed: {}", e)))?;
        match row {
            Some(row) => {
                let count: i64 = row
                    .try_get("", "cnt")
                    .map_err(|e| CacheError::Tier2Error(e.to_string()))?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let row = self
            .connection
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Sqlite,
                "SELECT 1 AS one FROM cache_entries WHERE key = ?",
                [key.into()],
            ))
            .await
            .map_err(|e| CacheError::Tier2Error(format!("SQL query failed: {}", e)))?;
        Ok(row.is_some())
    }

    /// 清空全部条目
    pub async fn clear(&self) -> Result<()> {
        self.exec_sql("DELETE FROM cache_entries").await
    }
}
