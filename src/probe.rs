//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了运行环境探测：内存压力与连接质量。
//!
//! 预加载器据此抬升概率阈值，资源紧张时只加载最有把握的候选。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// 内存压力档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
}

impl MemoryPressure {
    /// 概率阈值的抬升系数
    pub fn threshold_factor(&self) -> f64 {
        match self {
            MemoryPressure::Low => 1.0,
            MemoryPressure::Medium => 1.5,
            MemoryPressure::High => 2.5,
        }
    }
}

/// 连接质量档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Fast,
    Medium,
    Slow,
}

impl ConnectionQuality {
    /// 概率阈值的抬升系数
    pub fn threshold_factor(&self) -> f64 {
        match self {
            ConnectionQuality::Fast => 1.0,
            ConnectionQuality::Medium => 1.25,
            ConnectionQuality::Slow => 2.0,
        }
    }
}

/// 环境快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSnapshot {
    pub memory: MemoryPressure,
    pub connection: ConnectionQuality,
}

impl EnvSnapshot {
    /// 合成阈值系数：两档系数相乘
    pub fn threshold_factor(&self) -> f64 {
        self.memory.threshold_factor() * self.connection.threshold_factor()
    }
}

impl Default for EnvSnapshot {
    fn default() -> Self {
        Self {
            memory: MemoryPressure::Low,
            connection: ConnectionQuality::Fast,
        }
    }
}

/// 环境探测器
///
/// 宿主应用最了解自身环境，探测实现由其注入
#[async_trait]
pub trait EnvProbe: Send + Sync {
    async fn sample(&self) -> EnvSnapshot;
}

/// 固定值探测器：默认实现，也便于测试中直接设定环境
pub struct StaticProbe {
    snapshot: Mutex<EnvSnapshot>,
}

impl StaticProbe {
    pub fn new(snapshot: EnvSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    pub fn set(&self, snapshot: EnvSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(EnvSnapshot::default())
    }
}

#[async_trait]
impl EnvProbe for StaticProbe {
    async fn sample(&self) -> EnvSnapshot {
        *self.snapshot.lock().unwrap()
    }
}
