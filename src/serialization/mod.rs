//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了序列化器接口，缓存核心只搬运字节，类型安全由调用点保证。

pub mod json;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};

/// 序列化器特征
pub trait Serializer: Send + Sync {
    /// 序列化值为字节数组
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// 从字节数组反序列化值
    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;
}

/// 序列化器枚举
///
/// 静态分发各具体实现，避免trait object的泛型限制
#[derive(Clone)]
pub enum SerializerEnum {
    Json(json::JsonSerializer),
}

impl Serializer for SerializerEnum {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            SerializerEnum::Json(s) => s.serialize(value),
        }
    }

    fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            SerializerEnum::Json(s) => s.deserialize(data),
        }
    }
}

impl Default for SerializerEnum {
    fn default() -> Self {
        SerializerEnum::Json(json::JsonSerializer::new())
    }
}
