//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存层后端：Tier1内存层与Tier2持久化层。

pub mod tier1;
pub mod tier2;
