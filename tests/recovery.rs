//! 崩溃恢复测试
//! Crash recovery tests

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use quartz_store::{
  GroupMatcher, JobDetail, JobKey, Recurrence, Trigger, TriggerKey, TriggerState,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_interrupted_firing_is_recovered_after_restart() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop")
    .durable(true)
    .requests_recovery(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );

  let scheduled_fire_time;
  {
    // 实例 I1 点火后未上报完成就"崩溃"
    // Instance I1 "crashes" after firing without reporting completion
    let store = common::store_at(&dir, "i1", "cluster-rec").await;
    store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();
    let acquired = store
      .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
      .await
      .unwrap();
    let results = store.triggers_fired(&acquired, &token).await.unwrap();
    scheduled_fire_time = results[0].bundle.as_ref().unwrap().scheduled_fire_time;
    assert_eq!(
      store.get_trigger_state(&trigger.key, &token).await.unwrap(),
      Some(TriggerState::Executing)
    );
  }

  // I1 重启
  // I1 restarts
  let store = common::store_at(&dir, "i1", "cluster-rec").await;
  store.scheduler_started(&token).await.unwrap();

  // 卡在执行状态的触发器被释放
  // The trigger stuck in the executing state was freed
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );

  // 每条要求恢复的中断点火都对应一个恢复触发器
  // One recovery trigger per interrupted firing that requested recovery
  let recovery_keys = store
    .trigger_keys(&GroupMatcher::Equals("recovering".into()), &token)
    .await
    .unwrap();
  assert_eq!(recovery_keys.len(), 1);
  let recovery = store
    .retrieve_trigger(&recovery_keys[0], &token)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(recovery.job_key, job.key);
  assert_eq!(
    recovery.next_fire_time.unwrap().timestamp_millis(),
    scheduled_fire_time.timestamp_millis()
  );
  assert_eq!(recovery.misfire_instruction, -1);

  // 原来的点火记录已删除：再跑一次恢复不会新增恢复触发器
  // The original firing records are gone: a second recovery adds nothing
  store.scheduler_started(&token).await.unwrap();
  let again = store
    .trigger_keys(&GroupMatcher::Equals("recovering".into()), &token)
    .await
    .unwrap();
  assert_eq!(again.len(), 1);

  // 无论多迟，恢复触发器都可以被取得
  // The recovery trigger is acquirable no matter how late
  let acquired = store
    .acquire_next_triggers(Utc::now(), 10, Duration::ZERO, &token)
    .await
    .unwrap();
  assert!(acquired.iter().any(|t| t.key == recovery_keys[0]));

  store.shutdown(&token).await.unwrap();
}

#[tokio::test]
async fn test_startup_recovery_without_recovery_flag() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );

  {
    let store = common::store_at(&dir, "i1", "cluster-rec2").await;
    store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();
    let acquired = store
      .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
      .await
      .unwrap();
    store.triggers_fired(&acquired, &token).await.unwrap();
  }

  let store = common::store_at(&dir, "i1", "cluster-rec2").await;
  store.scheduler_started(&token).await.unwrap();

  // 不要求恢复的作业不产生恢复触发器
  // A job not requesting recovery produces no recovery trigger
  let recovery_keys = store
    .trigger_keys(&GroupMatcher::Equals("recovering".into()), &token)
    .await
    .unwrap();
  assert!(recovery_keys.is_empty());

  store.shutdown(&token).await.unwrap();
}

#[tokio::test]
async fn test_clean_shutdown_removes_registration_only() {
  let dir = TempDir::new().unwrap();
  let token = CancellationToken::new();

  let store = common::store_at(&dir, "i1", "cluster-shut").await;
  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    Utc::now(),
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();
  store.scheduler_started(&token).await.unwrap();
  store.shutdown(&token).await.unwrap();

  // 数据在关闭后保留
  // Data survives the shutdown
  assert!(store.check_job_exists(&job.key, &token).await.unwrap());
  assert!(store.check_trigger_exists(&trigger.key, &token).await.unwrap());
}
