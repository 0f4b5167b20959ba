//! 分布式互斥锁测试
//! Distributed mutex tests

mod common;

use quartz_store::lock::{LockManager, LockType};
use quartz_store::store::StoreConn;
use quartz_store::Error;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn manager(dir: &TempDir, instance_id: &str, ttl: Duration) -> LockManager {
  let config = common::base_config(dir, instance_id, "cluster-locks");
  let conn = StoreConn::connect(&config).await.unwrap();
  LockManager::new(
    conn,
    "cluster-locks".to_string(),
    instance_id.to_string(),
    ttl,
    Duration::from_millis(25),
  )
}

#[tokio::test]
async fn test_acquire_and_release() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let mgr = manager(&dir, "node-1", Duration::from_secs(30)).await;

  mgr.acquire(LockType::TriggerAccess, &token).await.unwrap();
  mgr.release(LockType::TriggerAccess).await.unwrap();
  // 释放后可以立即再次获取
  // Re-acquirable immediately after release
  mgr.acquire(LockType::TriggerAccess, &token).await.unwrap();
  mgr.release(LockType::TriggerAccess).await.unwrap();
}

#[tokio::test]
async fn test_locks_are_independent() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let mgr = manager(&dir, "node-1", Duration::from_secs(30)).await;

  // 两把命名锁互不阻塞
  // The two named locks do not block each other
  mgr.acquire(LockType::TriggerAccess, &token).await.unwrap();
  mgr.acquire(LockType::StateAccess, &token).await.unwrap();
  mgr.release(LockType::StateAccess).await.unwrap();
  mgr.release(LockType::TriggerAccess).await.unwrap();
}

#[tokio::test]
async fn test_contended_lock_waits_for_release() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let mgr_a = manager(&dir, "node-a", Duration::from_secs(30)).await;
  let mgr_b = manager(&dir, "node-b", Duration::from_secs(30)).await;

  mgr_a.acquire(LockType::TriggerAccess, &token).await.unwrap();

  let contender = {
    let token = token.clone();
    tokio::spawn(async move {
      mgr_b.acquire(LockType::TriggerAccess, &token).await.unwrap();
      mgr_b.release(LockType::TriggerAccess).await.unwrap();
    })
  };

  // 持有期间竞争者不可能完成
  // The contender cannot finish while the lock is held
  tokio::time::sleep(Duration::from_millis(150)).await;
  assert!(!contender.is_finished());

  mgr_a.release(LockType::TriggerAccess).await.unwrap();
  tokio::time::timeout(Duration::from_secs(5), contender)
    .await
    .expect("contender should acquire after release")
    .unwrap();
}

#[tokio::test]
async fn test_crashed_holder_is_taken_over_after_ttl() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let ttl = Duration::from_millis(400);
  let mgr_a = manager(&dir, "node-a", ttl).await;
  let mgr_b = manager(&dir, "node-b", ttl).await;

  // A 获取后"崩溃"：从不释放
  // A acquires and then "crashes": never releases
  mgr_a.acquire(LockType::TriggerAccess, &token).await.unwrap();
  drop(mgr_a);

  let started = Instant::now();
  mgr_b.acquire(LockType::TriggerAccess, &token).await.unwrap();
  let elapsed = started.elapsed();
  // 在一个 TTL 周期加一次轮询之内接管
  // Taken over within one TTL period plus one poll
  assert!(elapsed >= ttl.saturating_sub(Duration::from_millis(50)), "took {elapsed:?}");
  assert!(elapsed < ttl + Duration::from_secs(1), "took {elapsed:?}");
  mgr_b.release(LockType::TriggerAccess).await.unwrap();
}

#[tokio::test]
async fn test_non_owner_release_is_rejected() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let mgr_a = manager(&dir, "node-a", Duration::from_secs(30)).await;
  let mgr_b = manager(&dir, "node-b", Duration::from_secs(30)).await;

  mgr_a.acquire(LockType::TriggerAccess, &token).await.unwrap();
  // 非持有者的释放是空操作，不影响持有者
  // A non-owner release is a no-op and does not disturb the holder
  mgr_b.release(LockType::TriggerAccess).await.unwrap();

  let contender = {
    let token = token.clone();
    tokio::spawn(async move {
      mgr_b.acquire(LockType::TriggerAccess, &token).await.unwrap();
    })
  };
  tokio::time::sleep(Duration::from_millis(150)).await;
  assert!(!contender.is_finished(), "lock must still be held by node-a");

  mgr_a.release(LockType::TriggerAccess).await.unwrap();
  tokio::time::timeout(Duration::from_secs(5), contender)
    .await
    .expect("contender should acquire after the real release")
    .unwrap();
}

#[tokio::test]
async fn test_cancelled_acquire_exits_promptly() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();
  let mgr_a = manager(&dir, "node-a", Duration::from_secs(30)).await;
  let mgr_b = manager(&dir, "node-b", Duration::from_secs(30)).await;

  mgr_a.acquire(LockType::TriggerAccess, &token).await.unwrap();

  let cancel = CancellationToken::new();
  let waiter = {
    let cancel = cancel.clone();
    tokio::spawn(async move { mgr_b.acquire(LockType::TriggerAccess, &cancel).await })
  };
  tokio::time::sleep(Duration::from_millis(100)).await;
  cancel.cancel();
  let result = tokio::time::timeout(Duration::from_secs(2), waiter)
    .await
    .expect("cancelled acquire must exit promptly")
    .unwrap();
  assert!(matches!(result, Err(Error::Cancelled)));

  mgr_a.release(LockType::TriggerAccess).await.unwrap();
}
