//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了预测式预加载器：依据访问模式跟踪器的候选排序，
//! 结合环境探测（内存压力、连接质量）动态抬升准入阈值，
//! 在后台静默把高概率键装入缓存。预加载失败绝不影响主操作。

use crate::cache::tiered::TieredCache;
use crate::cache::EntryOptions;
use crate::config::PreloadConfig;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::probe::EnvProbe;
use crate::tracker::AccessTracker;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

type BytesLoader = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

/// 已注册的可预加载项
struct Loadable {
    loader: BytesLoader,
    options: EntryOptions,
}

/// 单轮预加载报告
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// 跟踪器给出的候选数
    pub candidates: usize,
    /// 实际发起加载的数量
    pub attempted: usize,
    /// 成功装入缓存的数量
    pub loaded: usize,
    /// 被跳过的数量（已缓存、低于阈值或未注册）
    pub skipped: usize,
    /// 加载失败的数量
    pub failed: usize,
}

/// 预测式预加载器
pub struct Preloader {
    cache: Arc<TieredCache>,
    tracker: Arc<AccessTracker>,
    probe: Arc<dyn EnvProbe>,
    config: PreloadConfig,
    metrics: Arc<Metrics>,
    loadables: DashMap<String, Loadable>,
    nudge: Notify,
    shutdown: Notify,
    periodic: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Preloader {
    pub fn new(
        cache: Arc<TieredCache>,
        tracker: Arc<AccessTracker>,
        probe: Arc<dyn EnvProbe>,
        config: PreloadConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            tracker,
            probe,
            config,
            metrics,
            loadables: DashMap::new(),
            nudge: Notify::new(),
            shutdown: Notify::new(),
            periodic: std::sync::Mutex::new(None),
        }
    }

    /// 注册一个可预加载的键及其加载函数
    ///
    /// 重复注册同一键时后者覆盖前者
    pub fn register_loadable<F, Fut>(&self, key: &str, options: EntryOptions, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let boxed: BytesLoader = Arc::new(move || loader().boxed());
        self.loadables.insert(
            key.to_string(),
            Loadable {
                loader: boxed,
                options,
            },
        );
    }

    /// 注销一个可预加载的键
    pub fn unregister_loadable(&self, key: &str) -> bool {
        self.loadables.remove(key).is_some()
    }

    /// 执行一轮预加载
    ///
    /// 整轮受 `cycle_budget_ms` 约束，超时静默放弃剩余候选
    #[instrument(skip(self), level = "debug")]
    pub async fn run_cycle(&self) -> PreloadReport {
        if !self.config.enabled {
            return PreloadReport::default();
        }

        let budget = Duration::from_millis(self.config.cycle_budget_ms);
        match tokio::time::timeout(budget, self.cycle_inner()).await {
            Ok(report) => {
                debug!(?report, "preload cycle finished");
                report
            }
            Err(_) => {
                debug!(budget_ms = self.config.cycle_budget_ms, "preload cycle budget exhausted");
                PreloadReport::default()
            }
        }
    }

    async fn cycle_inner(&self) -> PreloadReport {
        let mut report = PreloadReport::default();

        let env = self.probe.sample().await;
        let threshold = self.config.base_probability_threshold * env.threshold_factor();
        let candidates = self.tracker.predict(self.config.top_n);
        report.candidates = candidates.len();

        let spacing = Duration::from_millis(self.config.spacing_ms);
        for (key, probability) in candidates {
            if probability < threshold {
                report.skipped += 1;
                Metrics::incr(&self.metrics.preload_skipped);
                continue;
            }
            if self.cache.cached_in_tier1(&key) {
                report.skipped += 1;
                Metrics::incr(&self.metrics.preload_skipped);
                continue;
            }
            let loadable = match self.loadables.get(&key) {
                Some(entry) => (entry.loader.clone(), entry.options.clone()),
                None => {
                    report.skipped += 1;
                    Metrics::incr(&self.metrics.preload_skipped);
                    continue;
                }
            };

            report.attempted += 1;
            Metrics::incr(&self.metrics.preload_attempted);
            let (loader, options) = loadable;
            match self
                .cache
                .get_or_load_bytes(&key, move || loader(), &options)
                .await
            {
                Ok(_) => {
                    report.loaded += 1;
                    Metrics::incr(&self.metrics.preload_loaded);
                    debug!(key, probability, "preloaded key");
                }
                Err(e) => {
                    report.failed += 1;
                    Metrics::incr(&self.metrics.preload_failed);
                    warn!(key, error = %e, "preload failed, continuing");
                }
            }
            // 平滑后台负载，避免预加载挤占前台请求
            tokio::time::sleep(spacing).await;
        }
        report
    }

    /// 启动周期性预加载任务（幂等）
    pub fn spawn_periodic(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut guard = self.periodic.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let preloader = self.clone();
        *guard = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(preloader.config.interval_secs));
            // 首个tick立即到期，跳过以免启动即加载
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        preloader.run_cycle().await;
                    }
                    _ = preloader.nudge.notified() => {
                        preloader.run_cycle().await;
                    }
                    _ = preloader.shutdown.notified() => {
                        return;
                    }
                }
            }
        }));
        info!(interval_secs = self.config.interval_secs, "periodic preload started");
    }

    /// 请求提前执行一轮预加载
    ///
    /// 写操作成功后缓存视图失效，下一拍尽快回暖
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// 停止周期性预加载任务
    pub async fn stop(&self) {
        self.shutdown.notify_waiters();
        let handle = self.periodic.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "periodic preload task failed");
            }
        }
    }
}
