//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了批量调度的自适应控制器：以最近执行延迟的滑动窗口驱动
//! 批大小与并发度的加性增长/乘性收缩（AIMD），阈值均为可调参数。

use crate::config::SchedulerConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// 自适应批量控制器
pub struct AdaptiveController {
    window: Mutex<VecDeque<f64>>,
    batch_size: AtomicUsize,
    concurrency: AtomicUsize,
    config: SchedulerConfig,
}

impl AdaptiveController {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(config.latency_window)),
            batch_size: AtomicUsize::new(config.initial_batch_size),
            concurrency: AtomicUsize::new(config.initial_concurrency),
            config,
        }
    }

    /// 当前允许的最大批大小
    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Relaxed)
    }

    /// 当前允许的并发组数
    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Relaxed)
    }

    /// 记录一次执行延迟并调整参数
    pub fn record_latency(&self, latency_ms: f64) {
        let avg = {
            let mut window = self.window.lock().unwrap();
            window.push_back(latency_ms);
            while window.len() > self.config.latency_window {
                window.pop_front();
            }
            // 样本不足一半窗口时不调整，避免冷启动抖动
            if window.len() < self.config.latency_window / 2 {
                return;
            }
            window.iter().sum::<f64>() / window.len() as f64
        };

        if avg > self.config.latency_high_ms {
            self.shrink(avg);
        } else if avg < self.config.latency_low_ms {
            self.grow(avg);
        }
    }

    /// 乘性收缩：延迟越限时批大小与并发度减半
    fn shrink(&self, avg: f64) {
        let batch = self.batch_size.load(Ordering::Relaxed);
        let conc = self.concurrency.load(Ordering::Relaxed);
        let new_batch = (batch / 2).max(1);
        let new_conc = (conc / 2).max(1);
        if new_batch != batch || new_conc != conc {
            self.batch_size.store(new_batch, Ordering::Relaxed);
            self.concurrency.store(new_conc, Ordering::Relaxed);
            debug!(
                avg_latency_ms = avg,
                batch_size = new_batch,
                concurrency = new_conc,
                "adaptive controller shrank"
            );
        }
    }

    /// 加性增长：延迟宽裕时各加一，直到硬上限
    fn grow(&self, avg: f64) {
        let batch = self.batch_size.load(Ordering::Relaxed);
        let conc = self.concurrency.load(Ordering::Relaxed);
        let new_batch = (batch + 1).min(self.config.max_batch_size);
        let new_conc = (conc + 1).min(self.config.max_concurrency);
        if new_batch != batch || new_conc != conc {
            self.batch_size.store(new_batch, Ordering::Relaxed);
            self.concurrency.store(new_conc, Ordering::Relaxed);
            debug!(
                avg_latency_ms = avg,
                batch_size = new_batch,
                concurrency = new_conc,
                "adaptive controller grew"
            );
        }
    }
}
