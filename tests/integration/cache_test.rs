//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 分层缓存集成测试：TTL、标签失效、层间提升与回源加载

#[path = "../common/mod.rs"]
mod common;

use oxaccel::cache::EntryOptions;
use oxaccel::error::CacheError;
use oxaccel::{ManualClock, Priority};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_ttl_expiry_with_manual_clock() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock.clone()).await;

    cache
        .set_bytes(
            "today",
            b"done".to_vec(),
            &EntryOptions::default().with_ttl(Duration::from_secs(60)),
        )
        .await
        .expect("set should succeed");
    assert_eq!(
        cache.get_bytes("today").await.expect("get should succeed"),
        Some(b"done".to_vec())
    );

    clock.advance(Duration::from_secs(61));
    assert_eq!(
        cache.get_bytes("today").await.expect("get should succeed"),
        None
    );
}

#[tokio::test]
async fn test_tag_invalidation_removes_only_tagged() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock).await;

    for key in ["habit:1", "habit:2", "habit:3"] {
        cache
            .set_bytes(
                key,
                b"h".to_vec(),
                &EntryOptions::default().with_tag("resource:habits"),
            )
            .await
            .expect("set should succeed");
    }
    for key in ["entry:1", "entry:2"] {
        cache
            .set_bytes(
                key,
                b"e".to_vec(),
                &EntryOptions::default().with_tag("resource:entries"),
            )
            .await
            .expect("set should succeed");
    }

    let removed = cache
        .invalidate_by_tag("resource:habits")
        .await
        .expect("invalidation should succeed");
    assert_eq!(removed, 3);

    for key in ["habit:1", "habit:2", "habit:3"] {
        assert_eq!(cache.get_bytes(key).await.unwrap(), None);
    }
    for key in ["entry:1", "entry:2"] {
        assert!(cache.get_bytes(key).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_tier2_hit_promotes_to_tier1() {
    common::setup_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("accel.db");
    let mut config = common::test_config();
    config.tier2.connection_string = format!("sqlite://{}?mode=rwc", db_path.display());
    // 写阈值为0：所有写入都落Tier2
    config.tier2.write_threshold_bytes = 0;

    let clock = Arc::new(ManualClock::new());
    let first = common::tiered_cache(&config, clock.clone()).await;
    first
        .set_bytes("stats:week", b"summary".to_vec(), &EntryOptions::default())
        .await
        .expect("set should succeed");
    drop(first);

    // 新实例的Tier1为空，命中只能来自Tier2
    let second = common::tiered_cache(&config, clock).await;
    assert!(!second.cached_in_tier1("stats:week"));
    assert_eq!(
        second.get_bytes("stats:week").await.unwrap(),
        Some(b"summary".to_vec())
    );
    assert!(second.cached_in_tier1("stats:week"));
}

#[tokio::test]
async fn test_expiry_boundary_read_does_not_resurrect_entry() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let mut config = common::test_config();
    // 写阈值为0：条目同时进入两层
    config.tier2.write_threshold_bytes = 0;
    let cache = common::tiered_cache(&config, clock.clone()).await;

    cache
        .set_bytes(
            "today",
            b"done".to_vec(),
            &EntryOptions::default().with_ttl(Duration::from_secs(10)),
        )
        .await
        .expect("set should succeed");

    // TTL恰好耗尽的瞬间：两层都视为不存在，
    // 且Tier2命中不得以零剩余TTL提升为永不过期的Tier1条目
    clock.advance(Duration::from_secs(10));
    assert_eq!(cache.get_bytes("today").await.unwrap(), None);
    assert!(!cache.cached_in_tier1("today"));

    clock.advance(Duration::from_secs(3600));
    assert_eq!(cache.get_bytes("today").await.unwrap(), None);
}

#[tokio::test]
async fn test_critical_value_reaches_tier2_despite_size() {
    common::setup_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("accel.db");
    let mut config = common::test_config();
    config.tier2.connection_string = format!("sqlite://{}?mode=rwc", db_path.display());
    // 写阈值远大于值：普通值只进Tier1，Critical值仍应落盘
    config.tier2.write_threshold_bytes = 1024;

    let clock = Arc::new(ManualClock::new());
    let first = common::tiered_cache(&config, clock.clone()).await;
    first
        .set_bytes(
            "session",
            b"tiny".to_vec(),
            &EntryOptions::default().with_priority(Priority::Critical),
        )
        .await
        .expect("set should succeed");
    first
        .set_bytes("scratch", b"tiny".to_vec(), &EntryOptions::default())
        .await
        .expect("set should succeed");
    drop(first);

    let second = common::tiered_cache(&config, clock).await;
    assert_eq!(
        second.get_bytes("session").await.unwrap(),
        Some(b"tiny".to_vec())
    );
    // 普通小值未落Tier2，重开后不可见
    assert_eq!(second.get_bytes("scratch").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_or_load_invokes_loader_once() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock).await;
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let value = cache
            .get_or_load_bytes(
                "chains",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(b"streak".to_vec())
                },
                &EntryOptions::default(),
            )
            .await
            .expect("load should succeed");
        assert_eq!(value, b"streak");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loader_error_is_never_cached() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock).await;

    let result = cache
        .get_or_load_bytes(
            "flaky",
            || async { Err(CacheError::Connection("reset".to_string())) },
            &EntryOptions::default(),
        )
        .await;
    assert!(matches!(result, Err(CacheError::Connection(_))));
    assert_eq!(cache.get_bytes("flaky").await.unwrap(), None);

    // 失败不留痕，下一次加载正常执行并缓存
    let value = cache
        .get_or_load_bytes(
            "flaky",
            || async { Ok(b"recovered".to_vec()) },
            &EntryOptions::default(),
        )
        .await
        .expect("second load should succeed");
    assert_eq!(value, b"recovered");
    assert!(cache.cached_in_tier1("flaky"));
}

#[tokio::test]
async fn test_typed_roundtrip() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock).await;

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Habit {
        name: String,
        streak: u32,
    }

    let habit = Habit {
        name: "run".to_string(),
        streak: 12,
    };
    cache
        .set("habit:run", &habit, &EntryOptions::default())
        .await
        .expect("set should succeed");
    let loaded: Option<Habit> = cache.get("habit:run").await.expect("get should succeed");
    assert_eq!(loaded, Some(habit));
}

#[tokio::test]
async fn test_rejects_invalid_key() {
    common::setup_logging();
    let clock = Arc::new(ManualClock::new());
    let config = common::test_config();
    let cache = common::tiered_cache(&config, clock).await;

    let result = cache
        .set_bytes("bad key", b"v".to_vec(), &EntryOptions::default())
        .await;
    assert!(matches!(result, Err(CacheError::InvalidInput(_))));
}
