//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了加速引擎的错误类型和错误分类机制。

use thiserror::Error;

/// 加速引擎错误类型枚举
///
/// 定义了缓存、调度器和预加载器中可能发生的各种错误类型
#[derive(Error, Debug)]
pub enum CacheError {
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tier1缓存操作失败
    #[error("Tier1 operation failed: {0}")]
    Tier1Error(String),

    /// Tier2缓存操作失败
    #[error("Tier2 operation failed: {0}")]
    Tier2Error(String),

    /// Tier2容量已满（配额耗尽）
    #[error("Tier2 capacity exhausted: {0}")]
    Tier2Capacity(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 无效输入（编程错误，同步拒绝）
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 操作不支持
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// 加载函数执行失败
    #[error("Loader failed: {0}")]
    LoaderError(String),

    /// 远端校验错误（永久性，不重试）
    #[error("Validation rejected by backend: {0}")]
    Validation(String),

    /// 目标不存在（永久性，不重试）
    #[error("Not found: {0}")]
    NotFound(String),

    /// 写冲突（永久性，不重试）
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 连接错误（瞬时性，可重试）
    #[error("Connection error: {0}")]
    Connection(String),

    /// 远端限流（瞬时性，可重试）
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 超时错误（瞬时性，可重试）
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 操作被取消
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Sea-ORM数据库错误
    #[error("Database error: {0}")]
    SeaOrmError(#[from] sea_orm::DbErr),

    /// IO错误
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// 关闭错误
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// 错误分类
///
/// 调度器的重试策略依赖该分类：瞬时性与容量类错误按指数退避重试，
/// 永久性错误立即结算，编程错误在调用边界同步拒绝。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 瞬时性错误（超时、连接中断、限流）
    Transient,
    /// 永久性错误（校验失败、不存在、冲突）
    Permanent,
    /// 容量错误（Tier2配额耗尽）
    Capacity,
    /// 编程错误（非法参数）
    InvalidInput,
}

impl CacheError {
    /// 返回错误所属的分类
    pub fn class(&self) -> ErrorClass {
        match self {
            CacheError::Timeout(_)
            | CacheError::Connection(_)
            | CacheError::RateLimited(_)
            | CacheError::IoError(_) => ErrorClass::Transient,
            CacheError::Tier2Capacity(_) => ErrorClass::Capacity,
            CacheError::InvalidInput(_) | CacheError::ConfigError(_) => ErrorClass::InvalidInput,
            _ => ErrorClass::Permanent,
        }
    }

    /// 该错误是否允许调度器重试
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::Capacity)
    }

    /// 复制一份语义等价的错误
    ///
    /// 请求去重需要把同一个失败分发给多个等待方；库错误（`#[from]`变体）
    /// 不可克隆，降级为携带原始消息的同类错误，保持错误分类不变。
    pub fn duplicate(&self) -> CacheError {
        use CacheError::*;
        match self {
            Serialization(s) => Serialization(s.clone()),
            Tier1Error(s) => Tier1Error(s.clone()),
            Tier2Error(s) => Tier2Error(s.clone()),
            Tier2Capacity(s) => Tier2Capacity(s.clone()),
            ConfigError(s) => ConfigError(s.clone()),
            InvalidInput(s) => InvalidInput(s.clone()),
            NotSupported(s) => NotSupported(s.clone()),
            LoaderError(s) => LoaderError(s.clone()),
            Validation(s) => Validation(s.clone()),
            NotFound(s) => NotFound(s.clone()),
            Conflict(s) => Conflict(s.clone()),
            Connection(s) => Connection(s.clone()),
            RateLimited(s) => RateLimited(s.clone()),
            Timeout(s) => Timeout(s.clone()),
            Cancelled(s) => Cancelled(s.clone()),
            SeaOrmError(e) => Tier2Error(e.to_string()),
            IoError(e) => Connection(e.to_string()),
            ShutdownError(s) => ShutdownError(s.clone()),
        }
    }
}

/// 缓存操作结果类型别名
///
/// 简化错误处理，所有引擎操作都返回此类型
pub type Result<T> = std::result::Result<T, CacheError>;
