//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了Tier1缓存后端：进程内高速层，自带TTL、标签
//! 与"年龄/频率/优先级"混合淘汰策略。

use crate::cache::Priority;
use crate::clock::Clock;
use crate::config::Tier1Config;
use crate::metrics::Metrics;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tier1缓存条目
///
/// 写入后仅由内部簿记修改，外部拿到的是值的拷贝
#[derive(Debug, Clone)]
pub struct Tier1Entry {
    pub value: Vec<u8>,
    pub stored_at: Instant,
    /// 过期时长，`Duration::ZERO` 表示永不过期
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed_at: Instant,
    pub size_bytes: usize,
    pub priority: Priority,
    pub tags: HashSet<String>,
}

impl Tier1Entry {
    fn is_expired(&self, now: Instant) -> bool {
        // TTL恰好耗尽即视为过期，与Tier2口径一致
        !self.ttl.is_zero() && now >= self.stored_at + self.ttl
    }
}

/// Tier1缓存后端
///
/// 所有方法均为同步操作（无await点），在tokio单次poll内完成，
/// 因此标签失效对后续读取是原子的。
pub struct Tier1Backend {
    entries: DashMap<String, Tier1Entry>,
    total_bytes: AtomicUsize,
    config: Tier1Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl Tier1Backend {
    pub fn new(config: Tier1Config, clock: Arc<dyn Clock>, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            config,
            clock,
            metrics,
        }
    }

    /// 读取缓存值
    ///
    /// 过期条目视为不存在并被立即清除；命中时更新访问簿记
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.is_expired(now) {
                    true
                } else {
                    entry.access_count += 1;
                    entry.last_accessed_at = now;
                    return Some(entry.value.clone());
                }
            }
            None => return None,
        };
        if expired {
            self.remove(key);
            debug!(key, "tier1 entry expired, purged");
        }
        None
    }

    /// 探测键是否存在且未过期，不更新访问簿记
    pub fn peek(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// 写入缓存值，超出容量预算时触发淘汰
    pub fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        priority: Priority,
        tags: HashSet<String>,
    ) {
        let now = self.clock.now();
        let size_bytes = key.len() + value.len();
        let entry = Tier1Entry {
            value,
            stored_at: now,
            ttl,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
            priority,
            tags,
        };
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            self.total_bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        self.enforce_budget();
    }

    /// 删除缓存条目
    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.total_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// 按标签失效，返回移除的条目数
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().tags.contains(tag))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.remove(&key) {
                removed += 1;
            }
        }
        removed
    }

    /// 清空全部条目
    pub fn clear(&self) {
        self.entries.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    /// 清除已过期条目，返回清除数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        let mut purged = 0;
        for key in keys {
            if self.remove(&key) {
                purged += 1;
            }
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn priority_weight(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Low => self.config.weight_low,
            Priority::Normal => self.config.weight_normal,
            Priority::High => self.config.weight_high,
            // Critical不参与淘汰，权重仅作兜底
            Priority::Critical => f64::MAX,
        }
    }

    /// 淘汰评分：距上次访问的年龄 / (1 + 访问次数) / 优先级权重
    ///
    /// 同时融合新近度、频率与显式重要性，分数越高越先被淘汰
    fn eviction_score(&self, entry: &Tier1Entry, now: Instant) -> f64 {
        let age_secs = now
            .saturating_duration_since(entry.last_accessed_at)
            .as_secs_f64()
            // 同一瞬间写入的批量条目也要能分出先后
            .max(1e-6);
        age_secs / (1.0 + entry.access_count as f64) / self.priority_weight(entry.priority)
    }

    /// 超出条目数或字节预算时，反复淘汰评分最高的非Critical条目
    fn enforce_budget(&self) {
        loop {
            let over_items = self.entries.len() > self.config.max_entries;
            let over_bytes = self.bytes_used() > self.config.max_bytes;
            if !over_items && !over_bytes {
                return;
            }

            let now = self.clock.now();
            let victim = self
                .entries
                .iter()
                .filter(|entry| entry.value().priority != Priority::Critical)
                .map(|entry| (entry.key().clone(), self.eviction_score(entry.value(), now)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(key, _)| key);

            match victim {
                Some(key) => {
                    self.remove(&key);
                    Metrics::incr(&self.metrics.evictions);
                    debug!(key = %key, "tier1 evicted entry over budget");
                }
                // 只剩Critical条目，预算允许被其独占
                None => return,
            }
        }
    }
}
