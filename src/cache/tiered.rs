//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了分层缓存客户端：组合Tier1与Tier2，
//! 读路径自动提升，写路径按值大小与优先级路由，未命中经去重器回源。

use crate::backend::{tier1::Tier1Backend, tier2::Tier2Backend};
use crate::cache::{EntryOptions, Priority};
use crate::clock::Clock;
use crate::config::GlobalConfig;
use crate::dedup::RequestDeduplicator;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::serialization::{Serializer, SerializerEnum};
use crate::tracker::AccessTracker;
use crate::util::{validate_key, validate_value_size};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// 分层缓存客户端
///
/// 所有组件由组合根注入，不持有任何全局状态
pub struct TieredCache {
    tier1: Arc<Tier1Backend>,
    tier2: Arc<Tier2Backend>,
    dedup: RequestDeduplicator,
    tracker: Arc<AccessTracker>,
    serializer: SerializerEnum,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    global: GlobalConfig,
    tier2_write_threshold: usize,
}

impl TieredCache {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tier1: Arc<Tier1Backend>,
        tier2: Arc<Tier2Backend>,
        tracker: Arc<AccessTracker>,
        serializer: SerializerEnum,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
        global: GlobalConfig,
        tier2_write_threshold: usize,
    ) -> Self {
        Self {
            tier1,
            tier2,
            dedup: RequestDeduplicator::new(metrics.clone()),
            tracker,
            serializer,
            metrics,
            clock,
            global,
            tier2_write_threshold,
        }
    }

    /// 读取缓存值（字节）
    ///
    /// Tier1未命中时尝试Tier2，命中则提升回Tier1；过期条目视为不存在
    #[instrument(skip(self), level = "debug")]
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key, self.global.max_key_length)?;

        if let Some(bytes) = self.tier1.get(key) {
            Metrics::incr(&self.metrics.tier1_hits);
            self.tracker.record_access(key);
            return Ok(Some(bytes));
        }
        Metrics::incr(&self.metrics.tier1_misses);

        match self.tier2.get(key).await {
            Ok(Some(entry)) => {
                // 提升到Tier1，沿用剩余TTL与原有优先级/标签；
                // 剩余TTL归零的条目已到期，不得以零TTL（永不过期）提升
                let ttl = match entry.remaining_ttl(self.clock.now_millis()) {
                    Some(remaining) if remaining.is_zero() => {
                        if let Err(e) = self.tier2.delete(key).await {
                            warn!(key, error = %e, "failed to purge expired tier2 entry");
                        }
                        Metrics::incr(&self.metrics.tier2_misses);
                        return Ok(None);
                    }
                    Some(remaining) => remaining,
                    None => Duration::ZERO,
                };
                Metrics::incr(&self.metrics.tier2_hits);
                self.tier1.set(
                    key,
                    entry.value.clone(),
                    ttl,
                    entry.priority,
                    entry.tags.clone(),
                );
                self.tracker.record_access(key);
                debug!(key, "tier2 hit promoted to tier1");
                Ok(Some(entry.value))
            }
            Ok(None) => {
                Metrics::incr(&self.metrics.tier2_misses);
                Ok(None)
            }
            Err(e) => {
                // Tier2读故障降级为未命中，不阻断主操作
                warn!(key, error = %e, "tier2 read failed, treating as miss");
                Metrics::incr(&self.metrics.tier2_misses);
                Ok(None)
            }
        }
    }

    /// 写入缓存值（字节）
    ///
    /// 总是写入Tier1；大值或Critical值同时写入Tier2，
    /// Tier2失败（配额等）降级为仅Tier1，不向调用方报错
    #[instrument(skip(self, value), level = "debug", fields(value_len = value.len()))]
    pub async fn set_bytes(&self, key: &str, value: Vec<u8>, options: &EntryOptions) -> Result<()> {
        validate_key(key, self.global.max_key_length)?;
        validate_value_size(&value, self.global.max_value_size)?;

        let ttl = options
            .ttl
            .unwrap_or(Duration::from_secs(self.global.default_ttl_secs));

        self.tier1
            .set(key, value.clone(), ttl, options.priority, options.tags.clone());

        // 小而廉价的值重算即可，大值与Critical值值得落盘
        let wants_tier2 =
            value.len() >= self.tier2_write_threshold || options.priority == Priority::Critical;
        if wants_tier2 {
            if let Err(e) = self
                .tier2
                .set(key, value, Some(ttl), options.priority, &options.tags)
                .await
            {
                Metrics::incr(&self.metrics.tier2_degradations);
                warn!(key, error = %e, "tier2 write failed, degraded to tier1 only");
            }
        }
        Ok(())
    }

    /// 读取或加载（字节）
    ///
    /// 未命中时经请求去重器调用 `loader`：同键并发只触发一次加载，
    /// 加载错误原样传播且绝不缓存
    pub async fn get_or_load_bytes<F, Fut>(
        &self,
        key: &str,
        loader: F,
        options: &EntryOptions,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        if let Some(bytes) = self.get_bytes(key).await? {
            return Ok(bytes);
        }

        let bytes = self
            .dedup
            .dedupe(key, async {
                Metrics::incr(&self.metrics.loader_calls);
                let bytes = loader().await?;
                validate_value_size(&bytes, self.global.max_value_size)?;
                self.set_bytes(key, bytes.clone(), options).await?;
                Ok(bytes)
            })
            .await?;
        self.tracker.record_access(key);
        Ok(bytes)
    }

    /// 读取缓存值（带反序列化）
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(self.serializer.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// 写入缓存值（带序列化）
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: &EntryOptions) -> Result<()> {
        let bytes = self.serializer.serialize(value)?;
        self.set_bytes(key, bytes, options).await
    }

    /// 读取或加载（带序列化）
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, loader: F, options: &EntryOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let serializer = self.serializer.clone();
        let bytes = self
            .get_or_load_bytes(
                key,
                move || async move {
                    let value = loader().await?;
                    serializer.serialize(&value)
                },
                options,
            )
            .await?;
        self.serializer.deserialize(&bytes)
    }

    /// 删除缓存条目（两层）
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key, self.global.max_key_length)?;
        self.tier1.remove(key);
        self.tier2.delete(key).await?;
        Ok(())
    }

    /// 按标签失效（两层），返回移除的条目总数
    #[instrument(skip(self), level = "debug")]
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let from_tier1 = self.tier1.invalidate_by_tag(tag) as u64;
        let from_tier2 = self.tier2.invalidate_by_tag(tag).await.unwrap_or_else(|e| {
            warn!(tag, error = %e, "tier2 tag invalidation failed");
            0
        });
        let total = from_tier1 + from_tier2;
        self.metrics
            .tag_invalidations
            .fetch_add(total, std::sync::atomic::Ordering::Relaxed);
        debug!(tag, removed = total, "tag invalidated");
        Ok(total)
    }

    /// 键是否已存在于Tier1（未过期），不更新访问簿记
    pub fn cached_in_tier1(&self, key: &str) -> bool {
        self.tier1.peek(key)
    }

    /// 两层过期清理，返回 (tier1清除数, tier2清除数)
    pub async fn purge_expired(&self) -> Result<(usize, u64)> {
        let t1 = self.tier1.purge_expired();
        let t2 = self.tier2.purge_expired().await?;
        Ok((t1, t2))
    }

    /// 清空两层缓存
    pub async fn clear(&self) -> Result<()> {
        self.tier1.clear();
        self.tier2.clear().await
    }

    pub fn serializer(&self) -> &SerializerEnum {
        &self.serializer
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
