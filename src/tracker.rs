//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了访问模式跟踪器，记录每个键的访问频率与间隔，
//! 并用指数移动平均预测下一次访问时间，为预加载器提供候选排序。

use crate::clock::Clock;
use crate::config::TrackerConfig;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// 单个键的访问模式记录
#[derive(Debug, Clone)]
pub struct AccessPattern {
    /// 累计访问次数（单调递增）
    pub frequency: u64,
    /// 最近一次访问时间
    pub last_access_at: Instant,
    /// 平均访问间隔（指数移动平均，毫秒）
    pub avg_interval_ms: f64,
}

impl AccessPattern {
    /// 预测的下一次访问时间
    pub fn predicted_next_at(&self) -> Instant {
        self.last_access_at + Duration::from_millis(self.avg_interval_ms as u64)
    }
}

/// 访问模式跟踪器
///
/// 记录数量受全局上限约束，超出时按记录自身的LRU裁剪
pub struct AccessTracker {
    patterns: DashMap<String, AccessPattern>,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
}

impl AccessTracker {
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            patterns: DashMap::new(),
            config,
            clock,
        }
    }

    /// 记录一次访问
    ///
    /// 更新频率、最近访问时间和EMA间隔；首次访问仅建立记录
    pub fn record_access(&self, key: &str) {
        let now = self.clock.now();
        let alpha = self.config.ema_alpha;

        match self.patterns.get_mut(key) {
            Some(mut pattern) => {
                let interval_ms = now
                    .saturating_duration_since(pattern.last_access_at)
                    .as_secs_f64()
                    * 1000.0;
                pattern.avg_interval_ms = if pattern.frequency == 1 {
                    interval_ms
                } else {
                    alpha * interval_ms + (1.0 - alpha) * pattern.avg_interval_ms
                };
                pattern.frequency += 1;
                pattern.last_access_at = now;
                trace!(
                    key,
                    frequency = pattern.frequency,
                    avg_interval_ms = pattern.avg_interval_ms,
                    "access recorded"
                );
            }
            None => {
                self.patterns.insert(
                    key.to_string(),
                    AccessPattern {
                        frequency: 1,
                        last_access_at: now,
                        avg_interval_ms: 0.0,
                    },
                );
                if self.patterns.len() > self.config.max_patterns {
                    self.prune_lru();
                }
            }
        }
    }

    /// 预测接下来最可能被访问的键
    ///
    /// 返回按概率降序排列的 `(key, probability)`，probability ∈ [0, 1]。
    /// 仅基于已记录状态计算，无任何I/O。
    pub fn predict(&self, top_n: usize) -> Vec<(String, f64)> {
        let now = self.clock.now();
        let mut scored: Vec<(String, f64)> = self
            .patterns
            .iter()
            .filter(|entry| entry.value().frequency >= self.config.min_frequency)
            .map(|entry| {
                let score = Self::score(entry.value(), now);
                (entry.key().clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);
        scored
    }

    /// 查询某个键的访问模式记录
    pub fn pattern(&self, key: &str) -> Option<AccessPattern> {
        self.patterns.get(key).map(|p| p.value().clone())
    }

    /// 已跟踪的键数量
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 概率启发式：频率、预测时刻邻近度与近期访问三者加权
    fn score(pattern: &AccessPattern, now: Instant) -> f64 {
        let freq_score = (pattern.frequency as f64 / 10.0).min(1.0);

        // 距离预测访问时刻越近得分越高，以平均间隔为尺度
        let scale_ms = pattern.avg_interval_ms.max(1.0);
        let predicted = pattern.predicted_next_at();
        let distance_ms = if now >= predicted {
            now.saturating_duration_since(predicted).as_secs_f64() * 1000.0
        } else {
            predicted.saturating_duration_since(now).as_secs_f64() * 1000.0
        };
        let proximity_score = 1.0 / (1.0 + distance_ms / scale_ms);

        let since_last_secs = now
            .saturating_duration_since(pattern.last_access_at)
            .as_secs_f64();
        let recency_score = 1.0 / (1.0 + since_last_secs / 60.0);

        0.4 * freq_score + 0.4 * proximity_score + 0.2 * recency_score
    }

    /// 按记录自身的LRU裁剪到容量上限
    fn prune_lru(&self) {
        while self.patterns.len() > self.config.max_patterns {
            let oldest = self
                .patterns
                .iter()
                .min_by_key(|entry| entry.value().last_access_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.patterns.remove(&key);
                }
                None => break,
            }
        }
    }
}
