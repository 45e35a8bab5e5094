//! oxaccel - 客户端数据访问加速引擎
//!
//! 为本地优先应用提供分层缓存（内存 + SQLite持久化）、访问模式跟踪、
//! 请求去重、批量操作调度与预测式预加载的一体化数据访问层。
//!
//! 所有依赖（时钟、环境探测、批量执行器）显式注入，无全局单例，
//! 同一进程可并存多个互不干扰的引擎实例。

#![doc(html_root_url = "https://docs.rs/oxaccel/0.1.0")]

pub use serde;
pub use serde::{Deserialize, Serialize};
pub use serde_json;
pub use tokio;

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod preload;
pub mod probe;
pub mod scheduler;
pub mod serialization;
pub mod tracker;
pub mod util;

// Re-export commonly used items
pub use cache::{tiered::TieredCache, EntryOptions, Priority};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{resource_tag, AccessEngine};
pub use error::{CacheError, ErrorClass, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use preload::{PreloadReport, Preloader};
pub use probe::{ConnectionQuality, EnvProbe, EnvSnapshot, MemoryPressure, StaticProbe};
pub use scheduler::{
    BatchExecutor, BatchScheduler, OperationHandle, OperationKind, OperationRequest,
    OperationResult, SubmitOptions, SuccessHook,
};
pub use tracker::{AccessPattern, AccessTracker};

/// oxaccel 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
