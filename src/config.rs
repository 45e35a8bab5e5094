//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了加速引擎的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;

/// 引擎总配置
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub config_version: Option<u32>,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub tier1: Tier1Config,
    #[serde(default)]
    pub tier2: Tier2Config,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// 全局配置
///
/// 定义适用于所有组件的默认配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GlobalConfig {
    /// 默认的缓存过期时间（秒）
    pub default_ttl_secs: u64,
    /// 键的最大长度
    pub max_key_length: usize,
    /// 值的最大大小（字节）
    pub max_value_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_key_length: 256,
            max_value_size: 1024 * 1024, // 1MB
        }
    }
}

/// Tier1缓存配置
///
/// 定义内存缓存层的容量预算和淘汰权重
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Tier1Config {
    /// 最大条目数
    pub max_entries: usize,
    /// 最大字节预算
    pub max_bytes: usize,
    /// 低优先级条目的淘汰权重
    pub weight_low: f64,
    /// 普通优先级条目的淘汰权重
    pub weight_normal: f64,
    /// 高优先级条目的淘汰权重
    pub weight_high: f64,
}

impl Default for Tier1Config {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 16 * 1024 * 1024, // 16MB
            weight_low: 0.5,
            weight_normal: 1.0,
            weight_high: 4.0,
        }
    }
}

/// Tier2缓存配置
///
/// 定义持久化缓存层（本地SQLite文件）的相关配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Tier2Config {
    /// SQLite连接字符串，`sqlite::memory:` 表示仅内存
    pub connection_string: String,
    /// 连接超时时间（毫秒）
    pub connect_timeout_ms: u64,
    /// 最大条目数（配额，超出时写入以容量错误降级）
    pub max_entries: u64,
    /// 大值写入阈值（字节）：达到该大小的值同时落入Tier2
    pub write_threshold_bytes: usize,
}

impl Default for Tier2Config {
    fn default() -> Self {
        Self {
            connection_string: "sqlite::memory:".to_string(),
            connect_timeout_ms: 5000,
            max_entries: 100_000,
            write_threshold_bytes: 4096,
        }
    }
}

/// 批量操作调度器配置
///
/// 自适应控制器的阈值均为可调参数，默认值偏保守
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 初始最大批大小
    pub initial_batch_size: usize,
    /// 批大小硬上限
    pub max_batch_size: usize,
    /// 初始并发组数
    pub initial_concurrency: usize,
    /// 并发组数硬上限
    pub max_concurrency: usize,
    /// 组内分片大小（每片等待完成后再执行下一片）
    pub chunk_size: usize,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 最大重试次数
    pub max_retries: u32,
    /// 默认操作超时（毫秒）
    pub default_timeout_ms: u64,
    /// 调度循环间隔（毫秒）
    pub dispatch_interval_ms: u64,
    /// 延迟滑动窗口大小
    pub latency_window: usize,
    /// 平均延迟高水位（毫秒），超过则收缩
    pub latency_high_ms: f64,
    /// 平均延迟低水位（毫秒），低于则增长
    pub latency_low_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 16,
            max_batch_size: 128,
            initial_concurrency: 2,
            max_concurrency: 8,
            chunk_size: 8,
            retry_base_delay_ms: 100,
            max_retries: 3,
            default_timeout_ms: 10_000,
            dispatch_interval_ms: 20,
            latency_window: 32,
            latency_high_ms: 500.0,
            latency_low_ms: 250.0,
        }
    }
}

/// 预加载器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PreloadConfig {
    /// 是否启用预加载
    pub enabled: bool,
    /// 每轮从访问模式跟踪器拉取的候选数
    pub top_n: usize,
    /// 基础概率阈值，资源紧张时按比例抬升
    pub base_probability_threshold: f64,
    /// 预加载调用之间的间隔（毫秒）
    pub spacing_ms: u64,
    /// 单轮预加载的总预算（毫秒），超出后静默放弃
    pub cycle_budget_ms: u64,
    /// 周期驱动间隔（秒）
    pub interval_secs: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: 10,
            base_probability_threshold: 0.3,
            spacing_ms: 50,
            cycle_budget_ms: 5000,
            interval_secs: 30,
        }
    }
}

/// 访问模式跟踪器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TrackerConfig {
    /// 跟踪的键数量上限（超出按LRU裁剪记录本身）
    pub max_patterns: usize,
    /// 指数移动平均的平滑系数 alpha ∈ (0, 1]
    pub ema_alpha: f64,
    /// 参与预测所需的最低访问频次
    pub min_frequency: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_patterns: 4096,
            ema_alpha: 0.3,
            min_frequency: 3,
        }
    }
}

impl Config {
    /// 从TOML字符串解析配置
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(s).map_err(|e| CacheError::ConfigError(format!("TOML parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置合法性
    ///
    /// 非法参数属于编程错误，在构造边界同步拒绝
    pub fn validate(&self) -> Result<()> {
        if let Some(v) = self.config_version {
            if v != CONFIG_VERSION {
                return Err(CacheError::ConfigError(format!(
                    "unsupported config_version {} (expected {})",
                    v, CONFIG_VERSION
                )));
            }
        }
        if self.global.max_key_length == 0 {
            return Err(CacheError::ConfigError(
                "global.max_key_length must be > 0".to_string(),
            ));
        }
        if self.tier1.max_entries == 0 || self.tier1.max_bytes == 0 {
            return Err(CacheError::ConfigError(
                "tier1 capacity budgets must be > 0".to_string(),
            ));
        }
        if self.tier1.weight_low <= 0.0
            || self.tier1.weight_normal <= 0.0
            || self.tier1.weight_high <= 0.0
        {
            return Err(CacheError::ConfigError(
                "tier1 eviction weights must be positive".to_string(),
            ));
        }
        if self.tier2.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "tier2.max_entries must be > 0".to_string(),
            ));
        }
        if self.scheduler.initial_batch_size == 0
            || self.scheduler.initial_batch_size > self.scheduler.max_batch_size
        {
            return Err(CacheError::ConfigError(
                "scheduler batch size out of range".to_string(),
            ));
        }
        if self.scheduler.initial_concurrency == 0
            || self.scheduler.initial_concurrency > self.scheduler.max_concurrency
        {
            return Err(CacheError::ConfigError(
                "scheduler concurrency out of range".to_string(),
            ));
        }
        if self.scheduler.chunk_size == 0 {
            return Err(CacheError::ConfigError(
                "scheduler.chunk_size must be > 0".to_string(),
            ));
        }
        if self.scheduler.retry_base_delay_ms == 0 {
            return Err(CacheError::ConfigError(
                "scheduler.retry_base_delay_ms must be > 0".to_string(),
            ));
        }
        if self.scheduler.max_retries > 32 {
            return Err(CacheError::ConfigError(
                "scheduler.max_retries must be <= 32".to_string(),
            ));
        }
        if self.scheduler.latency_low_ms >= self.scheduler.latency_high_ms {
            return Err(CacheError::ConfigError(
                "scheduler latency_low_ms must be below latency_high_ms".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.preload.base_probability_threshold) {
            return Err(CacheError::ConfigError(
                "preload.base_probability_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.tracker.max_patterns == 0 {
            return Err(CacheError::ConfigError(
                "tracker.max_patterns must be > 0".to_string(),
            ));
        }
        if !(self.tracker.ema_alpha > 0.0 && self.tracker.ema_alpha <= 1.0) {
            return Err(CacheError::ConfigError(
                "tracker.ema_alpha must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
