//! Misfire 清扫测试
//! Misfire sweep tests

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use quartz_store::{
  JobDetail, JobKey, Recurrence, Trigger, TriggerKey, TriggerState, REPEAT_INDEFINITELY,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const THRESHOLD: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_misfired_trigger_is_recomputed_and_notified_once() {
  let dir = TempDir::new().unwrap();
  let config = common::base_config(&dir, "node-1", "cluster-mf").misfire_threshold(THRESHOLD);
  let (store, signaler) = common::store_with_signaler(config).await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  // 下一次点火落后阈值五倍
  // The next fire lags five thresholds behind
  let start = Utc::now() - ChronoDuration::milliseconds(5 * THRESHOLD.as_millis() as i64);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    start,
    Recurrence::simple(Duration::from_millis(100), REPEAT_INDEFINITELY),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let floor = Utc::now() - ChronoDuration::milliseconds(THRESHOLD.as_millis() as i64);
  let result = store.recover_misfires(&token).await.unwrap();
  assert_eq!(result.count, 1);
  assert!(!result.has_more);
  assert_eq!(signaler.misfired.load(Ordering::SeqCst), 1);

  let loaded = store
    .retrieve_trigger(&trigger.key, &token)
    .await
    .unwrap()
    .unwrap();
  // 点火时间被推进到 misfire 下限之后
  // The fire time was advanced past the misfire floor
  assert!(loaded.next_fire_time.unwrap() >= floor);
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );

  // 幂等：再次清扫无事可做，也不再通知
  // Idempotent: a second sweep has nothing to do and notifies no one
  let again = store.recover_misfires(&token).await.unwrap();
  assert_eq!(again.count, 0);
  assert_eq!(signaler.misfired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_trigger_is_finalized() {
  let dir = TempDir::new().unwrap();
  let config = common::base_config(&dir, "node-1", "cluster-mf2").misfire_threshold(THRESHOLD);
  let (store, signaler) = common::store_with_signaler(config).await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let start = Utc::now() - ChronoDuration::seconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "once"),
    job.key.clone(),
    start,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let result = store.recover_misfires(&token).await.unwrap();
  assert_eq!(result.count, 1);
  assert_eq!(result.earliest_new_fire_time, None);
  // 没有后续点火：触发器被终结并通知
  // No further fire: the trigger is finalized and notified
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Complete)
  );
  assert_eq!(signaler.finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_misfire_batch_bound_and_has_more() {
  let dir = TempDir::new().unwrap();
  let config = common::base_config(&dir, "node-1", "cluster-mf3")
    .misfire_threshold(THRESHOLD)
    .max_misfires_per_pass(2);
  let (store, _signaler) = common::store_with_signaler(config).await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  store.store_job(&job, false, &token).await.unwrap();
  let start = Utc::now() - ChronoDuration::seconds(10);
  for name in ["a", "b", "c"] {
    let trigger = Trigger::new(
      TriggerKey::new("g", name),
      job.key.clone(),
      start,
      Recurrence::simple(Duration::from_millis(100), REPEAT_INDEFINITELY),
    );
    store.store_trigger(&trigger, false, &token).await.unwrap();
  }

  let first = store.recover_misfires(&token).await.unwrap();
  assert_eq!(first.count, 2);
  assert!(first.has_more);
  assert!(first.earliest_new_fire_time.is_some());

  let second = store.recover_misfires(&token).await.unwrap();
  assert_eq!(second.count, 1);
  assert!(!second.has_more);

  let third = store.recover_misfires(&token).await.unwrap();
  assert_eq!(third.count, 0);
}

#[tokio::test]
async fn test_ignore_policy_is_exempt_from_sweep() {
  let dir = TempDir::new().unwrap();
  let config = common::base_config(&dir, "node-1", "cluster-mf4").misfire_threshold(THRESHOLD);
  let (store, signaler) = common::store_with_signaler(config).await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let start = Utc::now() - ChronoDuration::seconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "stubborn"),
    job.key.clone(),
    start,
    Recurrence::one_shot(),
  )
  .misfire_instruction(-1);
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let result = store.recover_misfires(&token).await.unwrap();
  assert_eq!(result.count, 0);
  assert_eq!(signaler.misfired.load(Ordering::SeqCst), 0);

  // 忽略策略的触发器依旧可以被取得，无论多迟
  // A policy-ignoring trigger stays acquirable no matter how late
  let acquired = store
    .acquire_next_triggers(Utc::now(), 1, Duration::ZERO, &token)
    .await
    .unwrap();
  assert_eq!(acquired.len(), 1);
  assert_eq!(acquired[0].key, trigger.key);
}
