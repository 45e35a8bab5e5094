//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了可注入的时钟抽象，使TTL、退避和预测逻辑可以在测试中使用模拟时间。

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 时钟抽象
///
/// 引擎内所有时间读取都经过该接口，测试通过 [`ManualClock`] 手动推进时间
pub trait Clock: Send + Sync {
    /// 单调时间，用于TTL与间隔计算
    fn now(&self) -> Instant;

    /// 墙上时钟毫秒时间戳，用于Tier2持久化条目
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 手动时钟
///
/// 从创建时刻起步，仅通过 [`ManualClock::advance`] 前进
pub struct ManualClock {
    state: Mutex<(Instant, i64)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((Instant::now(), chrono::Utc::now().timestamp_millis())),
        }
    }

    /// 推进时钟
    pub fn advance(&self, d: Duration) {
        let mut state = self.state.lock().unwrap();
        state.0 += d;
        state.1 += d.as_millis() as i64;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap().0
    }

    fn now_millis(&self) -> i64 {
        self.state.lock().unwrap().1
    }
}
