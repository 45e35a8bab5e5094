//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了请求去重器：同一个键只允许一个在途加载，
//! 并发到达的调用方共享同一个结果（成功值或失败原因）。

use crate::error::{CacheError, Result};
use crate::metrics::Metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// 去重结果在等待方之间广播的载体
type Outcome = std::result::Result<Vec<u8>, Arc<CacheError>>;

/// 请求去重器
///
/// 在途注册表的清理依赖 [`FlightGuard`]：无论正常结算、出错还是
/// 领导者任务被取消，注册都恰好移除一次，后续调用会开启全新的加载。
pub struct RequestDeduplicator {
    in_flight: DashMap<String, broadcast::Sender<Outcome>>,
    metrics: Arc<Metrics>,
}

/// 在途注册的清理守卫
///
/// 领导者未能正常结算（panic或future被丢弃）时，Drop负责移除注册并
/// 关闭频道，等待方据此得知加载已被放弃。
struct FlightGuard<'a> {
    registry: &'a DashMap<String, broadcast::Sender<Outcome>>,
    key: String,
    settled: bool,
}

impl FlightGuard<'_> {
    /// 结算：移除注册并把结果广播给全部等待方
    fn settle(mut self, outcome: Outcome) {
        if let Some((_, tx)) = self.registry.remove(&self.key) {
            let _ = tx.send(outcome);
        }
        self.settled = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.remove(&self.key);
        }
    }
}

impl RequestDeduplicator {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            in_flight: DashMap::new(),
            metrics,
        }
    }

    /// 执行去重加载
    ///
    /// 若该键已有在途操作，等待其结果；否则以领导者身份执行 `op`，
    /// 结束后把结果分发给期间到达的全部等待方。
    pub async fn dedupe<F>(&self, key: &str, op: F) -> Result<Vec<u8>>
    where
        F: Future<Output = Result<Vec<u8>>>,
    {
        let receiver = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => Some(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx);
                None
            }
        };

        if let Some(mut rx) = receiver {
            Metrics::incr(&self.metrics.dedup_joins);
            debug!(key, "joining in-flight load");
            return match rx.recv().await {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(shared)) => Err(shared.duplicate()),
                // 领导者被取消或panic，注册已被守卫清理
                Err(_) => Err(CacheError::Cancelled(format!(
                    "in-flight load for '{}' was abandoned",
                    key
                ))),
            };
        }

        let guard = FlightGuard {
            registry: &self.in_flight,
            key: key.to_string(),
            settled: false,
        };

        let result = op.await;
        match result {
            Ok(bytes) => {
                guard.settle(Ok(bytes.clone()));
                Ok(bytes)
            }
            Err(e) => {
                let shared = Arc::new(e);
                guard.settle(Err(shared.clone()));
                Err(shared.duplicate())
            }
        }
    }

    /// 当前在途操作数量
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
