//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了分层缓存的公共类型和客户端实现。

pub mod tiered;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// 条目优先级
///
/// Critical条目不参与容量淘汰；优先级同时用于批量操作的排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// 数值序（越大越优先），用于调度排序与Tier2持久化
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Priority {
        match rank {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// 写入选项
///
/// 控制TTL、优先级和分组失效标签
#[derive(Debug, Clone)]
pub struct EntryOptions {
    /// 过期时长，None表示使用全局默认TTL
    pub ttl: Option<Duration>,
    pub priority: Priority,
    pub tags: HashSet<String>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            priority: Priority::Normal,
            tags: HashSet::new(),
        }
    }
}

impl EntryOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}
