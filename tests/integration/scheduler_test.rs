//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 批量调度器集成测试：优先级顺序、重试退避、超时与结算保证

#[path = "../common/mod.rs"]
mod common;

use common::{MockExecutor, Scripted};
use oxaccel::error::CacheError;
use oxaccel::scheduler::{BatchScheduler, OperationKind, SubmitOptions};
use oxaccel::{Metrics, Priority, SystemClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn scheduler_with(executor: Arc<MockExecutor>) -> BatchScheduler {
    let config = common::test_config();
    BatchScheduler::new(
        config.scheduler,
        executor,
        Arc::new(Metrics::new()),
        Arc::new(SystemClock),
    )
}

#[tokio::test]
async fn test_priority_execution_order() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler_with(executor.clone());

    // 先全部入队，再启动调度：一波内按优先级降序执行
    let mut handles = Vec::new();
    for (label, priority) in [
        ("low", Priority::Low),
        ("critical", Priority::Critical),
        ("normal", Priority::Normal),
        ("high", Priority::High),
    ] {
        handles.push(
            scheduler
                .submit(
                    OperationKind::Create,
                    "habits",
                    json!({ "label": label }),
                    None,
                    SubmitOptions {
                        priority,
                        timeout: None,
                    },
                )
                .expect("submit should succeed"),
        );
    }
    scheduler.start();
    for handle in handles {
        handle.wait().await.expect("operation should settle ok");
    }

    let order: Vec<String> = executor
        .calls()
        .iter()
        .map(|c| c.payload["label"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(order, vec!["critical", "high", "normal", "low"]);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_doubles() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    executor.script("habits", &[Scripted::Timeout, Scripted::Connection, Scripted::Ok]);
    let scheduler = scheduler_with(executor.clone());
    scheduler.start();

    let handle = scheduler
        .submit(
            OperationKind::Update,
            "habits",
            json!({ "id": 7 }),
            None,
            SubmitOptions::default(),
        )
        .expect("submit should succeed");
    let result = handle.wait().await.expect("operation should settle ok");
    assert_eq!(result.retries_attempted, 2);

    let calls = executor.calls_for("habits");
    assert_eq!(calls.len(), 3);
    // 基础延迟50ms：第一次重试约50ms后，第二次约100ms后
    let gap1 = calls[1].at - calls[0].at;
    let gap2 = calls[2].at - calls[1].at;
    assert!(gap1 >= Duration::from_millis(50), "gap1 = {:?}", gap1);
    assert!(gap1 < Duration::from_millis(90), "gap1 = {:?}", gap1);
    assert!(gap2 >= Duration::from_millis(100), "gap2 = {:?}", gap2);
    assert!(gap2 < Duration::from_millis(160), "gap2 = {:?}", gap2);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_permanent_error_settles_without_retry() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    executor.script("habits", &[Scripted::Validation]);
    let scheduler = scheduler_with(executor.clone());
    scheduler.start();

    let handle = scheduler
        .submit(
            OperationKind::Create,
            "habits",
            json!({ "name": "" }),
            None,
            SubmitOptions::default(),
        )
        .expect("submit should succeed");
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, CacheError::Validation(_)));
    assert_eq!(executor.call_count(), 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_settles_with_last_error() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    executor.script(
        "habits",
        &[
            Scripted::Connection,
            Scripted::Connection,
            Scripted::Connection,
            Scripted::Connection,
        ],
    );
    let scheduler = scheduler_with(executor.clone());
    scheduler.start();

    let handle = scheduler
        .submit(
            OperationKind::Delete,
            "habits",
            json!({ "id": 1 }),
            None,
            SubmitOptions::default(),
        )
        .expect("submit should succeed");
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, CacheError::Connection(_)));
    // max_retries = 3：共4次尝试
    assert_eq!(executor.call_count(), 4);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_execution_times_out() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    executor.set_delay(Duration::from_secs(60));
    let mut config = common::test_config();
    config.scheduler.max_retries = 0;
    let scheduler = BatchScheduler::new(
        config.scheduler,
        executor.clone(),
        Arc::new(Metrics::new()),
        Arc::new(SystemClock),
    );
    scheduler.start();

    let handle = scheduler
        .submit(
            OperationKind::Read,
            "habits",
            json!(null),
            None,
            SubmitOptions {
                priority: Priority::Normal,
                timeout: Some(Duration::from_millis(100)),
            },
        )
        .expect("submit should succeed");
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, CacheError::Timeout(_)));
    assert_eq!(executor.call_count(), 1);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_critical_update_settles_before_bulk_creates() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    executor.set_delay(Duration::from_millis(5));
    let scheduler = scheduler_with(executor.clone());

    // 每个操作结算时把自己的标签写入日志，按结算顺序排列
    let settlement_log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut waiters = Vec::new();
    for i in 0..50 {
        let handle = scheduler
            .submit(
                OperationKind::Create,
                "entries",
                json!({ "i": i }),
                None,
                SubmitOptions::default(),
            )
            .expect("submit should succeed");
        let log = settlement_log.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait().await.expect("create should settle ok");
            log.lock().unwrap().push(format!("create:{}", i));
        }));
    }
    let critical = scheduler
        .submit(
            OperationKind::Update,
            "habits",
            json!({ "label": "critical" }),
            None,
            SubmitOptions {
                priority: Priority::Critical,
                timeout: None,
            },
        )
        .expect("submit should succeed");
    {
        let log = settlement_log.clone();
        waiters.push(tokio::spawn(async move {
            critical.wait().await.expect("critical should settle ok");
            log.lock().unwrap().push("critical".to_string());
        }));
    }
    scheduler.start();
    for waiter in waiters {
        waiter.await.expect("waiter task should finish");
    }

    // Critical更新的结算必须先于50个普通创建中的至少49个
    let log = settlement_log.lock().unwrap();
    let critical_pos = log
        .iter()
        .position(|label| label == "critical")
        .expect("critical must have settled");
    assert!(critical_pos <= 1, "critical settled at position {}", critical_pos);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_settles_undispatched_operations() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler_with(executor.clone());

    // 调度循环从未运行：关停后队列残留操作也必须以关闭错误结算
    let handle = scheduler
        .submit(
            OperationKind::Create,
            "entries",
            json!({ "i": 0 }),
            None,
            SubmitOptions::default(),
        )
        .expect("submit should succeed");
    scheduler.shutdown().await;

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, CacheError::ShutdownError(_)));
    assert_eq!(executor.call_count(), 0);
    assert_eq!(scheduler.queue_depth(), 0);
}

#[tokio::test]
async fn test_shutdown_drains_pending_queue() {
    common::setup_logging();
    let executor = Arc::new(MockExecutor::new());
    let scheduler = scheduler_with(executor.clone());

    let mut handles = Vec::new();
    for i in 0..8 {
        handles.push(
            scheduler
                .submit(
                    OperationKind::Create,
                    "entries",
                    json!({ "i": i }),
                    None,
                    SubmitOptions::default(),
                )
                .expect("submit should succeed"),
        );
    }
    // 未手动start：shutdown前先启动，确保队列被排空后退出
    scheduler.start();
    scheduler.shutdown().await;

    for handle in handles {
        handle.wait().await.expect("queued op settles before exit");
    }
    assert_eq!(executor.call_count(), 8);
    assert_eq!(scheduler.queue_depth(), 0);
}
