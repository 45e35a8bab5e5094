//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 统一工具模块
//!
//! 提供测试和库共用的工具函数，包括：
//! - 日志设置工具
//! - 输入验证工具

use crate::error::CacheError;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .try_init()
            .ok();
    });
}

const VALID_KEY_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_.:/@";

/// 验证缓存键
///
/// 空键、超长键或包含非法字符的键属于编程错误，同步拒绝
pub fn validate_key(key: &str, max_length: usize) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidInput(
            "cache key cannot be empty".to_string(),
        ));
    }
    if key.len() > max_length {
        return Err(CacheError::InvalidInput(format!(
            "cache key exceeds maximum length of {} bytes (got {} bytes)",
            max_length,
            key.len()
        )));
    }
    for c in key.chars() {
        if !VALID_KEY_CHARS.contains(c) {
            return Err(CacheError::InvalidInput(format!(
                "cache key contains invalid character '{}'. Valid characters are: alphanumeric and -_.:/@",
                c
            )));
        }
    }
    Ok(())
}

/// 验证值大小
pub fn validate_value_size(value: &[u8], max_size: usize) -> Result<(), CacheError> {
    if value.len() > max_size {
        return Err(CacheError::InvalidInput(format!(
            "cache value exceeds maximum size of {} bytes (got {} bytes)",
            max_size,
            value.len()
        )));
    }
    Ok(())
}
