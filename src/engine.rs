//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了数据访问加速引擎的组合根与门面。
//!
//! 引擎把分层缓存、访问模式跟踪、请求去重、批量调度与预测预加载
//! 装配成单一入口；所有依赖（时钟、环境探测、批量执行器）显式注入，
//! 不依赖任何全局单例，同一进程可并存多个互不干扰的实例。

use crate::cache::tiered::TieredCache;
use crate::cache::EntryOptions;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::preload::{PreloadReport, Preloader};
use crate::probe::{EnvProbe, StaticProbe};
use crate::scheduler::{
    BatchExecutor, BatchScheduler, OperationHandle, OperationKind, SubmitOptions,
};
use crate::serialization::SerializerEnum;
use crate::tracker::AccessTracker;
use crate::backend::{tier1::Tier1Backend, tier2::Tier2Backend};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 资源集合对应的失效标签
///
/// 读路径以该标签写入缓存，写路径提交后立即据此失效
pub fn resource_tag(resource: &str) -> String {
    format!("resource:{}", resource)
}

/// 数据访问加速引擎
pub struct AccessEngine {
    cache: Arc<TieredCache>,
    tracker: Arc<AccessTracker>,
    scheduler: BatchScheduler,
    preloader: Arc<Preloader>,
    metrics: Arc<Metrics>,
}

impl AccessEngine {
    /// 以完整依赖装配引擎
    ///
    /// 配置在此同步验证，Tier2连接在此建立
    #[instrument(skip_all, level = "info")]
    pub async fn new(
        config: Config,
        executor: Arc<dyn BatchExecutor>,
        probe: Arc<dyn EnvProbe>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let tracker = Arc::new(AccessTracker::new(config.tracker.clone(), clock.clone()));
        let tier1 = Arc::new(Tier1Backend::new(
            config.tier1.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let tier2 = Arc::new(Tier2Backend::new(&config.tier2, clock.clone()).await?);
        let cache = Arc::new(TieredCache::new(
            tier1,
            tier2,
            tracker.clone(),
            SerializerEnum::default(),
            metrics.clone(),
            clock.clone(),
            config.global.clone(),
            config.tier2.write_threshold_bytes,
        ));

        let scheduler = BatchScheduler::new(
            config.scheduler.clone(),
            executor,
            metrics.clone(),
            clock.clone(),
        );
        scheduler.start();

        let preloader = Arc::new(Preloader::new(
            cache.clone(),
            tracker.clone(),
            probe,
            config.preload.clone(),
            metrics.clone(),
        ));
        preloader.spawn_periodic();

        // 写操作成功结算后：失效该资源标签下的缓存读数据，并提醒预加载器回暖
        let hook_cache = cache.clone();
        let hook_preloader = preloader.clone();
        scheduler.set_success_hook(Arc::new(move |kind: OperationKind, resource: &str| {
            if kind == OperationKind::Read {
                return;
            }
            let cache = hook_cache.clone();
            let preloader = hook_preloader.clone();
            let tag = resource_tag(resource);
            tokio::spawn(async move {
                if let Err(e) = cache.invalidate_by_tag(&tag).await {
                    warn!(tag, error = %e, "post-write invalidation failed");
                }
                preloader.nudge();
            });
        }));

        info!("access engine assembled");
        Ok(Self {
            cache,
            tracker,
            scheduler,
            preloader,
            metrics,
        })
    }

    /// 以系统时钟和固定环境探测装配引擎
    pub async fn with_defaults(config: Config, executor: Arc<dyn BatchExecutor>) -> Result<Self> {
        Self::new(
            config,
            executor,
            Arc::new(StaticProbe::default()),
            Arc::new(SystemClock),
        )
        .await
    }

    /// 读取或加载一个值
    ///
    /// 命中直接返回；未命中经去重回源，结果按选项写入缓存
    pub async fn fetch<T, F, Fut>(&self, key: &str, loader: F, options: EntryOptions) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cache.get_or_load(key, loader, &options).await
    }

    /// 仅查缓存
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.cache.get(key).await
    }

    /// 直接写入缓存
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, options: EntryOptions) -> Result<()> {
        self.cache.set(key, value, &options).await
    }

    /// 删除缓存条目
    pub async fn evict(&self, key: &str) -> Result<()> {
        self.cache.delete(key).await
    }

    /// 按标签失效，返回移除的条目总数
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        self.cache.invalidate_by_tag(tag).await
    }

    /// 提交后端批量操作
    ///
    /// 变更类操作成功结算后，对应资源标签下的缓存读数据被失效，
    /// 预加载器随即被提醒回暖
    pub fn submit(
        &self,
        kind: OperationKind,
        resource: &str,
        payload: Value,
        conditions: Option<Value>,
        options: SubmitOptions,
    ) -> Result<OperationHandle> {
        self.scheduler.submit(kind, resource, payload, conditions, options)
    }

    /// 取消仍在队列中的批量操作
    pub fn cancel(&self, id: uuid::Uuid) -> bool {
        self.scheduler.cancel(id)
    }

    /// 注册可预加载键
    pub fn register_preloadable<F, Fut>(&self, key: &str, options: EntryOptions, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        self.preloader.register_loadable(key, options, loader);
    }

    /// 手动触发一轮预加载
    pub async fn run_preload_cycle(&self) -> PreloadReport {
        self.preloader.run_cycle().await
    }

    /// 两层缓存的过期清理
    pub async fn purge_expired(&self) -> Result<(usize, u64)> {
        self.cache.purge_expired().await
    }

    /// 清空缓存（不触碰访问模式记录）
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.clear().await
    }

    /// 当前指标快照
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn tracker(&self) -> &Arc<AccessTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// 有序关停：先停预加载，再排空调度队列
    #[instrument(skip(self), level = "info")]
    pub async fn shutdown(&self) {
        self.preloader.stop().await;
        self.scheduler.shutdown().await;
        info!("access engine shut down");
    }
}
