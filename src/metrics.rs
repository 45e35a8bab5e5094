//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了引擎的指标收集和快照功能。
//!
//! 指标对象由组合根显式构造并以 `Arc<Metrics>` 注入各组件，
//! 不使用全局单例；指标更新失败不影响主数据操作。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// 指标收集器
///
/// 用于收集缓存、调度器和预加载器的运行时指标
#[derive(Debug, Default)]
pub struct Metrics {
    /// Tier1命中数
    pub tier1_hits: AtomicU64,
    /// Tier1未命中数
    pub tier1_misses: AtomicU64,
    /// Tier2命中数
    pub tier2_hits: AtomicU64,
    /// Tier2未命中数
    pub tier2_misses: AtomicU64,
    /// 淘汰条目数
    pub evictions: AtomicU64,
    /// 按标签失效的条目数
    pub tag_invalidations: AtomicU64,
    /// 加载函数调用次数
    pub loader_calls: AtomicU64,
    /// 请求去重合并次数（跟随者数量）
    pub dedup_joins: AtomicU64,
    /// Tier2写入降级次数（容量不足时退化为仅Tier1）
    pub tier2_degradations: AtomicU64,

    /// 已提交操作数
    pub ops_submitted: AtomicU64,
    /// 成功结算操作数
    pub ops_succeeded: AtomicU64,
    /// 失败结算操作数
    pub ops_failed: AtomicU64,
    /// 重试次数
    pub ops_retried: AtomicU64,
    /// 取消操作数
    pub ops_cancelled: AtomicU64,
    /// 当前队列深度
    pub queue_depth: AtomicU64,

    /// 预加载尝试数
    pub preload_attempted: AtomicU64,
    /// 预加载成功数
    pub preload_loaded: AtomicU64,
    /// 预加载跳过数
    pub preload_skipped: AtomicU64,
    /// 预加载失败数
    pub preload_failed: AtomicU64,

    /// 操作耗时累积（秒总和 + 次数），用于计算平均延迟
    latency: Mutex<(f64, u64)>,
}

/// 指标快照
///
/// 只读导出结构，无行为约定，仅保证数值准确
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tier1_hits: u64,
    pub tier1_misses: u64,
    pub tier2_hits: u64,
    pub tier2_misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub tag_invalidations: u64,
    pub loader_calls: u64,
    pub dedup_joins: u64,
    pub tier2_degradations: u64,
    pub ops_submitted: u64,
    pub ops_succeeded: u64,
    pub ops_failed: u64,
    pub ops_retried: u64,
    pub ops_cancelled: u64,
    pub queue_depth: u64,
    pub avg_latency_secs: f64,
    pub preload_attempted: u64,
    pub preload_loaded: u64,
    pub preload_skipped: u64,
    pub preload_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次操作耗时
    pub fn record_latency(&self, duration_secs: f64) {
        if let Ok(mut guard) = self.latency.lock() {
            guard.0 += duration_secs;
            guard.1 += 1;
        }
    }

    /// 设置当前队列深度
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    /// 生成当前指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.tier1_hits.load(Ordering::Relaxed) + self.tier2_hits.load(Ordering::Relaxed);
        // Tier2未命中才是整体未命中；Tier1未命中可能被Tier2兜住
        let total_reads = hits + self.tier2_misses.load(Ordering::Relaxed);
        let hit_rate = if total_reads > 0 {
            hits as f64 / total_reads as f64
        } else {
            0.0
        };
        let (latency_sum, latency_count) = {
            let guard = self.latency.lock().unwrap();
            (guard.0, guard.1)
        };
        let avg_latency_secs = if latency_count > 0 {
            latency_sum / latency_count as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            tier1_hits: self.tier1_hits.load(Ordering::Relaxed),
            tier1_misses: self.tier1_misses.load(Ordering::Relaxed),
            tier2_hits: self.tier2_hits.load(Ordering::Relaxed),
            tier2_misses: self.tier2_misses.load(Ordering::Relaxed),
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            tag_invalidations: self.tag_invalidations.load(Ordering::Relaxed),
            loader_calls: self.loader_calls.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            tier2_degradations: self.tier2_degradations.load(Ordering::Relaxed),
            ops_submitted: self.ops_submitted.load(Ordering::Relaxed),
            ops_succeeded: self.ops_succeeded.load(Ordering::Relaxed),
            ops_failed: self.ops_failed.load(Ordering::Relaxed),
            ops_retried: self.ops_retried.load(Ordering::Relaxed),
            ops_cancelled: self.ops_cancelled.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            avg_latency_secs,
            preload_attempted: self.preload_attempted.load(Ordering::Relaxed),
            preload_loaded: self.preload_loaded.load(Ordering::Relaxed),
            preload_skipped: self.preload_skipped.load(Ordering::Relaxed),
            preload_failed: self.preload_failed.load(Ordering::Relaxed),
        }
    }
}
