//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 请求去重集成测试：同键并发加载的合并、错误共享与注册清理

#[path = "../common/mod.rs"]
mod common;

use oxaccel::cache::EntryOptions;
use oxaccel::dedup::RequestDeduplicator;
use oxaccel::error::CacheError;
use oxaccel::{Metrics, SystemClock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_merge_into_one() {
    common::setup_logging();
    let config = common::test_config();
    let cache = common::tiered_cache(&config, Arc::new(SystemClock)).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(10));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let calls = calls.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cache
                .get_or_load_bytes(
                    "today",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // 维持在途状态，确保后到者以跟随者身份加入
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(b"entries".to_vec())
                    },
                    &EntryOptions::default(),
                )
                .await
        }));
    }

    for handle in handles {
        let value = handle.await.expect("task").expect("load should succeed");
        assert_eq!(value, b"entries");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let snap = cache.metrics().snapshot();
    assert_eq!(snap.loader_calls, 1);
    assert!(snap.dedup_joins >= 1);
}

#[tokio::test]
async fn test_followers_receive_leader_result() {
    common::setup_logging();
    let dedup = Arc::new(RequestDeduplicator::new(Arc::new(Metrics::new())));
    let release = Arc::new(Notify::new());
    let follower_calls = Arc::new(AtomicUsize::new(0));

    let leader = {
        let dedup = dedup.clone();
        let release = release.clone();
        tokio::spawn(async move {
            dedup
                .dedupe("k", async move {
                    release.notified().await;
                    Ok(b"shared".to_vec())
                })
                .await
        })
    };

    // 等待领导者完成注册
    while dedup.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    let mut followers = Vec::new();
    for _ in 0..5 {
        let dedup = dedup.clone();
        let follower_calls = follower_calls.clone();
        followers.push(tokio::spawn(async move {
            dedup
                .dedupe("k", async move {
                    follower_calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"never".to_vec())
                })
                .await
        }));
    }
    tokio::task::yield_now().await;
    release.notify_one();

    assert_eq!(leader.await.expect("task").expect("leader"), b"shared");
    for follower in followers {
        assert_eq!(follower.await.expect("task").expect("follower"), b"shared");
    }
    // 跟随者自己的加载函数从未执行
    assert_eq!(follower_calls.load(Ordering::SeqCst), 0);
    assert_eq!(dedup.in_flight_count(), 0);
}

#[tokio::test]
async fn test_shared_failure_preserves_classification() {
    common::setup_logging();
    let dedup = Arc::new(RequestDeduplicator::new(Arc::new(Metrics::new())));
    let release = Arc::new(Notify::new());

    let leader = {
        let dedup = dedup.clone();
        let release = release.clone();
        tokio::spawn(async move {
            dedup
                .dedupe("k", async move {
                    release.notified().await;
                    Err(CacheError::RateLimited("429".to_string()))
                })
                .await
        })
    };
    while dedup.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    let follower = {
        let dedup = dedup.clone();
        tokio::spawn(async move { dedup.dedupe("k", async { Ok(b"never".to_vec()) }).await })
    };
    tokio::task::yield_now().await;
    release.notify_one();

    let leader_err = leader.await.expect("task").unwrap_err();
    let follower_err = follower.await.expect("task").unwrap_err();
    assert!(matches!(leader_err, CacheError::RateLimited(_)));
    // 跟随者拿到的副本保持同一错误分类
    assert_eq!(follower_err.class(), leader_err.class());
    assert_eq!(dedup.in_flight_count(), 0);
}

#[tokio::test]
async fn test_abandoned_leader_unblocks_followers() {
    common::setup_logging();
    let dedup = Arc::new(RequestDeduplicator::new(Arc::new(Metrics::new())));

    let leader = {
        let dedup = dedup.clone();
        tokio::spawn(async move {
            dedup
                .dedupe("k", async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(b"never".to_vec())
                })
                .await
        })
    };
    while dedup.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    let follower = {
        let dedup = dedup.clone();
        tokio::spawn(async move { dedup.dedupe("k", async { Ok(b"never".to_vec()) }).await })
    };
    tokio::task::yield_now().await;

    // 领导者被强行取消，守卫清理注册，跟随者收到放弃通知
    leader.abort();
    let err = follower.await.expect("task").unwrap_err();
    assert!(matches!(err, CacheError::Cancelled(_)));
    assert_eq!(dedup.in_flight_count(), 0);

    // 后续调用开启全新加载
    let value = dedup
        .dedupe("k", async { Ok(b"fresh".to_vec()) })
        .await
        .expect("fresh load");
    assert_eq!(value, b"fresh");
}
