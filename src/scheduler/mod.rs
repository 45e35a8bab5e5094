//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了批量操作调度器：按优先级出队、按（资源，操作类型）
//! 成组并发执行，组内分片推进，失败按指数退避重试，
//! 每个操作恰好结算一次（成功、失败或显式取消）。

pub mod adaptive;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{CacheError, Result};
use crate::metrics::Metrics;
use adaptive::AdaptiveController;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use crate::cache::Priority;

/// 批量操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Delete,
}

/// 提交给执行器的操作描述
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub id: Uuid,
    pub kind: OperationKind,
    /// 目标资源集合名，例如 `habits`、`entries`
    pub resource: String,
    pub payload: Value,
    /// 条件更新/删除的谓词，语义由执行器解释
    pub conditions: Option<Value>,
}

/// 操作结算结果
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub value: Value,
    pub retries_attempted: u32,
}

/// 提交选项
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub priority: Priority,
    /// 单次执行尝试的超时；None取配置默认值
    pub timeout: Option<Duration>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            timeout: None,
        }
    }
}

/// 批量执行器
///
/// 调度器对实际后端无感知，一切副作用经由该trait完成
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute(&self, request: &OperationRequest) -> Result<Value>;
}

/// 成功结算回调
///
/// 组合根借此衔接写后失效等副作用；回调在调度任务内同步执行，
/// 耗时工作应自行spawn
pub type SuccessHook = Arc<dyn Fn(OperationKind, &str) + Send + Sync>;

/// 操作句柄：持有者等待结算结果
///
/// 句柄被丢弃不影响操作执行，结算结果被静默丢弃
#[derive(Debug)]
pub struct OperationHandle {
    id: Uuid,
    rx: oneshot::Receiver<Result<OperationResult>>,
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 等待操作结算
    pub async fn wait(self) -> Result<OperationResult> {
        self.rx
            .await
            .map_err(|_| CacheError::Cancelled("scheduler dropped before settlement".to_string()))?
    }
}

/// 队列中的待执行操作
///
/// `responder` 是oneshot发送端，随操作一路移动，
/// 结构上保证恰好结算一次
struct PendingOp {
    request: OperationRequest,
    priority: Priority,
    timeout: Duration,
    retries_attempted: u32,
    seq: u64,
    submitted_at_ms: i64,
    responder: oneshot::Sender<Result<OperationResult>>,
}

struct SchedulerInner {
    queue: Mutex<Vec<PendingOp>>,
    seq: AtomicU64,
    executor: Arc<dyn BatchExecutor>,
    controller: AdaptiveController,
    config: SchedulerConfig,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    /// 新操作入队或重试回队时触发即时调度
    trigger: Notify,
    shutdown: Notify,
    closed: AtomicBool,
    on_success: Mutex<Option<SuccessHook>>,
}

/// 批量操作调度器
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn BatchExecutor>,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(Vec::new()),
                seq: AtomicU64::new(0),
                executor,
                controller: AdaptiveController::new(config.clone()),
                config,
                metrics,
                clock,
                trigger: Notify::new(),
                shutdown: Notify::new(),
                closed: AtomicBool::new(false),
                on_success: Mutex::new(None),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    /// 启动调度循环（幂等）
    pub fn start(&self) {
        let mut guard = self.dispatcher.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let inner = self.inner.clone();
        *guard = Some(tokio::spawn(async move {
            Self::run(inner).await;
        }));
        info!("batch scheduler started");
    }

    /// 安装成功结算回调（覆盖旧值）
    pub fn set_success_hook(&self, hook: SuccessHook) {
        *self.inner.on_success.lock().unwrap() = Some(hook);
    }

    /// 提交操作，返回可等待结算的句柄
    #[instrument(skip(self, payload, conditions, options), level = "debug")]
    pub fn submit(
        &self,
        kind: OperationKind,
        resource: &str,
        payload: Value,
        conditions: Option<Value>,
        options: SubmitOptions,
    ) -> Result<OperationHandle> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(CacheError::ShutdownError(
                "scheduler is shut down".to_string(),
            ));
        }
        if resource.is_empty() {
            return Err(CacheError::InvalidInput(
                "operation resource must not be empty".to_string(),
            ));
        }
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(self.inner.config.default_timeout_ms));
        if timeout.is_zero() {
            return Err(CacheError::InvalidInput(
                "operation timeout must be positive".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let op = PendingOp {
            request: OperationRequest {
                id,
                kind,
                resource: resource.to_string(),
                payload,
                conditions,
            },
            priority: options.priority,
            timeout,
            retries_attempted: 0,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            submitted_at_ms: self.inner.clock.now_millis(),
            responder: tx,
        };

        let depth = {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.push(op);
            queue.len()
        };
        Metrics::incr(&self.inner.metrics.ops_submitted);
        self.inner.metrics.set_queue_depth(depth);
        self.inner.trigger.notify_one();
        debug!(%id, ?kind, depth, "operation submitted");
        Ok(OperationHandle { id, rx })
    }

    /// 取消仍在队列中的操作
    ///
    /// 执行中或已结算的操作无法取消，返回false
    pub fn cancel(&self, id: Uuid) -> bool {
        let op = {
            let mut queue = self.inner.queue.lock().unwrap();
            let pos = queue.iter().position(|op| op.request.id == id);
            pos.map(|i| queue.remove(i))
        };
        match op {
            Some(op) => {
                Metrics::incr(&self.inner.metrics.ops_cancelled);
                let _ = op
                    .responder
                    .send(Err(CacheError::Cancelled(format!("operation {} cancelled", id))));
                debug!(%id, "operation cancelled");
                true
            }
            None => false,
        }
    }

    /// 当前队列深度
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// 立即触发一次调度
    pub fn nudge(&self) {
        self.inner.trigger.notify_one();
    }

    /// 关闭调度器：停止接收新操作，清空队列后退出
    ///
    /// 队列中尚未执行的操作全部派发完成；重试中的操作以关闭错误结算
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        let handle = self.dispatcher.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler dispatcher task failed");
            }
        }
        // 退避任务可能在派发器退出后才回队；这里兜底结算残留操作
        let leftovers: Vec<PendingOp> = self.inner.queue.lock().unwrap().drain(..).collect();
        for op in leftovers {
            Metrics::incr(&self.inner.metrics.ops_failed);
            let _ = op.responder.send(Err(CacheError::ShutdownError(
                "scheduler shut down before operation could run".to_string(),
            )));
        }
        self.inner.metrics.set_queue_depth(0);
        info!("batch scheduler shut down");
    }

    async fn run(inner: Arc<SchedulerInner>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(inner.config.dispatch_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = inner.trigger.notified() => {}
                _ = inner.shutdown.notified() => {
                    // 排空既有队列后退出
                    Self::dispatch_until_empty(&inner).await;
                    return;
                }
            }
            if inner.closed.load(Ordering::SeqCst) {
                Self::dispatch_until_empty(&inner).await;
                return;
            }
            Self::dispatch_until_empty(&inner).await;
        }
    }

    async fn dispatch_until_empty(inner: &Arc<SchedulerInner>) {
        loop {
            let groups = Self::form_wave(inner);
            if groups.is_empty() {
                return;
            }
            let wave: Vec<_> = groups
                .into_iter()
                .map(|ops| Self::execute_group(inner, ops))
                .collect();
            join_all(wave).await;
            inner
                .metrics
                .set_queue_depth(inner.queue.lock().unwrap().len());
        }
    }

    /// 组装一波执行计划
    ///
    /// 队列按（优先级降序，提交序号升序）排序后遍历：
    /// 同（资源，类型）归入同组，至多 `concurrency` 组、每组至多
    /// `batch_size` 个操作，其余留待下一波
    fn form_wave(inner: &SchedulerInner) -> Vec<Vec<PendingOp>> {
        let batch_size = inner.controller.batch_size();
        let concurrency = inner.controller.concurrency();

        let mut queue = inner.queue.lock().unwrap();
        if queue.is_empty() {
            return Vec::new();
        }
        queue.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.seq.cmp(&b.seq))
        });

        let mut groups: Vec<Vec<PendingOp>> = Vec::new();
        let mut index: HashMap<(String, OperationKind), usize> = HashMap::new();
        let mut remaining: Vec<PendingOp> = Vec::new();
        for op in queue.drain(..) {
            let group_key = (op.request.resource.clone(), op.request.kind);
            match index.get(&group_key).copied() {
                Some(i) if groups[i].len() < batch_size => groups[i].push(op),
                Some(_) => remaining.push(op),
                None if groups.len() < concurrency => {
                    index.insert(group_key, groups.len());
                    groups.push(vec![op]);
                }
                None => remaining.push(op),
            }
        }
        *queue = remaining;
        groups
    }

    /// 执行一组操作：按 `chunk_size` 分片，片内并发、片间串行
    async fn execute_group(inner: &Arc<SchedulerInner>, mut ops: Vec<PendingOp>) {
        let chunk_size = inner.config.chunk_size.max(1);
        while !ops.is_empty() {
            let take = chunk_size.min(ops.len());
            let chunk: Vec<PendingOp> = ops.drain(..take).collect();
            let futures: Vec<_> = chunk
                .into_iter()
                .map(|op| Self::execute_one(inner, op))
                .collect();
            join_all(futures).await;
        }
    }

    async fn execute_one(inner: &Arc<SchedulerInner>, op: PendingOp) {
        let started = std::time::Instant::now();
        let outcome =
            tokio::time::timeout(op.timeout, inner.executor.execute(&op.request)).await;
        let elapsed = started.elapsed();
        inner
            .controller
            .record_latency(elapsed.as_secs_f64() * 1000.0);
        inner.metrics.record_latency(elapsed.as_secs_f64());

        match outcome {
            Ok(Ok(value)) => {
                Metrics::incr(&inner.metrics.ops_succeeded);
                debug!(id = %op.request.id, retries = op.retries_attempted, "operation succeeded");
                let _ = op.responder.send(Ok(OperationResult {
                    value,
                    retries_attempted: op.retries_attempted,
                }));
                let hook = inner.on_success.lock().unwrap().clone();
                if let Some(hook) = hook {
                    hook(op.request.kind, &op.request.resource);
                }
            }
            Ok(Err(e)) => Self::handle_failure(inner, op, e),
            Err(_) => {
                let timeout_err =
                    CacheError::Timeout(format!("operation timed out after {:?}", op.timeout));
                Self::handle_failure(inner, op, timeout_err);
            }
        }
    }

    /// 失败处理：可重试类别按指数退避回队，否则立即失败结算
    fn handle_failure(inner: &Arc<SchedulerInner>, mut op: PendingOp, error: CacheError) {
        if !error.is_retryable() || op.retries_attempted >= inner.config.max_retries {
            Metrics::incr(&inner.metrics.ops_failed);
            warn!(
                id = %op.request.id,
                retries = op.retries_attempted,
                error = %error,
                "operation failed permanently"
            );
            let _ = op.responder.send(Err(error));
            return;
        }

        let multiplier = 1u64
            .checked_shl(op.retries_attempted)
            .unwrap_or(u64::MAX);
        let delay = Duration::from_millis(
            inner.config.retry_base_delay_ms.saturating_mul(multiplier),
        );
        op.retries_attempted += 1;
        Metrics::incr(&inner.metrics.ops_retried);
        debug!(
            id = %op.request.id,
            retry = op.retries_attempted,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "operation scheduled for retry"
        );

        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.closed.load(Ordering::SeqCst) {
                let _ = op.responder.send(Err(CacheError::ShutdownError(
                    "scheduler shut down during retry backoff".to_string(),
                )));
                return;
            }
            inner.queue.lock().unwrap().push(op);
            inner.trigger.notify_one();
        });
    }
}
