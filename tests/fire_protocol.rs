//! 取得 → 点火 → 完成协议测试
//! Acquire → fire → complete protocol tests

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use quartz_store::{
  CompletedInstruction, JobDetail, JobKey, Recurrence, Trigger, TriggerKey, TriggerState,
  REPEAT_INDEFINITELY,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_store_and_fire_once() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-fire").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  assert_eq!(acquired.len(), 1);
  assert_eq!(acquired[0].key, trigger.key);
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Acquired)
  );

  let results = store.triggers_fired(&acquired, &token).await.unwrap();
  assert_eq!(results.len(), 1);
  let bundle = results[0].bundle.as_ref().expect("expected a bundle");
  assert_eq!(bundle.job.key, job.key);
  assert_eq!(bundle.scheduled_fire_time.timestamp_millis(), t0.timestamp_millis());
  // 一次性触发器点火后没有后续时刻
  // A one-shot trigger has no successor instant after firing
  assert_eq!(bundle.trigger.next_fire_time, None);
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Executing)
  );

  store
    .triggered_job_complete(
      &bundle.trigger,
      &bundle.job,
      CompletedInstruction::SetComplete,
      &token,
    )
    .await
    .unwrap();
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Complete)
  );
}

#[tokio::test]
async fn test_two_instances_contending_for_one_trigger() {
  let dir = TempDir::new().unwrap();
  let store_a = common::store_at(&dir, "node-a", "cluster-race").await;
  let store_b = common::store_at(&dir, "node-b", "cluster-race").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store_a.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  // 两个实例并发竞争同一个触发器；恰好一个拿到
  // Two instances contend for one trigger concurrently; exactly one wins
  let (a, b) = tokio::join!(
    store_a.acquire_next_triggers(t0, 1, Duration::ZERO, &token),
    store_b.acquire_next_triggers(t0, 1, Duration::ZERO, &token),
  );
  let a = a.unwrap();
  let b = b.unwrap();
  assert_eq!(a.len() + b.len(), 1, "exactly one instance may acquire");
}

#[tokio::test]
async fn test_acquisition_ordering() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-order").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  store.store_job(&job, false, &token).await.unwrap();

  let now = Utc::now();
  // late 最晚；early 与 tie 同一时刻，tie 优先级更高
  // `late` is latest; `early` and `tie` share an instant, `tie` has the higher
  // priority
  let early = now - ChronoDuration::milliseconds(300);
  let late = now - ChronoDuration::milliseconds(100);
  for (name, at, priority) in [
    ("late", late, 5),
    ("early", early, 5),
    ("tie", early, 9),
  ] {
    let trigger = Trigger::new(
      TriggerKey::new("g", name),
      job.key.clone(),
      at,
      Recurrence::one_shot(),
    )
    .priority(priority);
    store.store_trigger(&trigger, false, &token).await.unwrap();
  }

  let acquired = store
    .acquire_next_triggers(now, 3, Duration::ZERO, &token)
    .await
    .unwrap();
  let names: Vec<&str> = acquired.iter().map(|t| t.key.name.as_str()).collect();
  assert_eq!(names, vec!["tie", "early", "late"]);
}

#[tokio::test]
async fn test_release_acquired_trigger_is_idempotent() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-rel").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  assert_eq!(acquired.len(), 1);

  store.release_acquired_trigger(&acquired[0], &token).await.unwrap();
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );
  // 再次释放是空操作
  // Releasing again is a no-op
  store.release_acquired_trigger(&acquired[0], &token).await.unwrap();
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );
}

#[tokio::test]
async fn test_fired_trigger_cannot_be_fired_twice() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-twice").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  let first = store.triggers_fired(&acquired, &token).await.unwrap();
  assert!(first[0].bundle.is_some());

  // acquired → executing 的比较交换已经被消费
  // The acquired → executing compare-and-set is already consumed
  let second = store.triggers_fired(&acquired, &token).await.unwrap();
  assert!(second[0].bundle.is_none());
  assert!(second[0].error.is_some());
}

#[tokio::test]
async fn test_repeating_trigger_returns_to_waiting() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-repeat").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::simple(Duration::from_secs(3600), REPEAT_INDEFINITELY),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  let results = store.triggers_fired(&acquired, &token).await.unwrap();
  let bundle = results[0].bundle.as_ref().unwrap();
  // 点火推进了下一次时刻
  // Firing advanced the next instant
  assert!(bundle.trigger.next_fire_time.unwrap() > t0);

  store
    .triggered_job_complete(
      &bundle.trigger,
      &bundle.job,
      CompletedInstruction::NoInstruction,
      &token,
    )
    .await
    .unwrap();
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );
}

#[tokio::test]
async fn test_one_shot_finalized_on_default_instruction() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-final").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(true);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  let results = store.triggers_fired(&acquired, &token).await.unwrap();
  let bundle = results[0].bundle.as_ref().unwrap();

  store
    .triggered_job_complete(
      &bundle.trigger,
      &bundle.job,
      CompletedInstruction::NoInstruction,
      &token,
    )
    .await
    .unwrap();
  // 没有后续点火的触发器在默认指令下被终结
  // A trigger with no further fire is finalized under the default instruction
  assert_eq!(
    store.get_trigger_state(&trigger.key, &token).await.unwrap(),
    Some(TriggerState::Complete)
  );
}

#[tokio::test]
async fn test_delete_instruction_removes_trigger() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-del").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "j"), "noop").durable(false);
  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let trigger = Trigger::new(
    TriggerKey::new("g", "t"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  );
  store.store_job_and_trigger(&job, &trigger, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  let results = store.triggers_fired(&acquired, &token).await.unwrap();
  let bundle = results[0].bundle.as_ref().unwrap();

  store
    .triggered_job_complete(
      &bundle.trigger,
      &bundle.job,
      CompletedInstruction::DeleteTrigger,
      &token,
    )
    .await
    .unwrap();
  assert!(!store.check_trigger_exists(&trigger.key, &token).await.unwrap());
  // 非持久作业随触发器一起删除
  // The non-durable job is removed with its trigger
  assert!(!store.check_job_exists(&job.key, &token).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_execution_disallowed_blocks_siblings() {
  let dir = TempDir::new().unwrap();
  let store = common::store_at(&dir, "node-1", "cluster-serial").await;
  let token = CancellationToken::new();

  let job = JobDetail::new(JobKey::new("g", "serial"), "noop")
    .durable(true)
    .concurrent_execution_disallowed(true);
  store.store_job(&job, false, &token).await.unwrap();

  let t0 = Utc::now() - ChronoDuration::milliseconds(10);
  let first = Trigger::new(
    TriggerKey::new("g", "first"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  )
  .priority(9);
  let sibling = Trigger::new(
    TriggerKey::new("g", "sibling"),
    job.key.clone(),
    t0,
    Recurrence::one_shot(),
  )
  .priority(1);
  store.store_trigger(&first, false, &token).await.unwrap();
  store.store_trigger(&sibling, false, &token).await.unwrap();

  let acquired = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  assert_eq!(acquired[0].key, first.key);
  let results = store.triggers_fired(&acquired, &token).await.unwrap();
  let bundle = results[0].bundle.as_ref().unwrap();

  // 兄弟触发器在执行窗口内被挡住
  // The sibling is blocked for the execution window
  assert_eq!(
    store.get_trigger_state(&sibling.key, &token).await.unwrap(),
    Some(TriggerState::Executing)
  );
  let none = store
    .acquire_next_triggers(t0, 1, Duration::ZERO, &token)
    .await
    .unwrap();
  assert!(none.is_empty());

  store
    .triggered_job_complete(
      &bundle.trigger,
      &bundle.job,
      CompletedInstruction::NoInstruction,
      &token,
    )
    .await
    .unwrap();
  // 完成后兄弟触发器被放回等待
  // Completion releases the sibling back to waiting
  assert_eq!(
    store.get_trigger_state(&sibling.key, &token).await.unwrap(),
    Some(TriggerState::Waiting)
  );
}
