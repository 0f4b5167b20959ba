//! 作业存储门面
//! Job store facade
//!
//! 调度器引擎消费的公开 API：实体的存取删改、组暂停/恢复、
//! The public API consumed by the scheduler engine: entity CRUD, group
//! pause/resume,
//! 取得/点火/完成协议，以及实例生命周期（注册、启动恢复、关闭、清扫器）。
//! the acquire/fire/complete protocol, and the instance lifecycle
//! (registration, startup recovery, shutdown, sweeper).

use crate::base::keys::{GroupMatcher, JobKey, TriggerKey};
use crate::base::state::{CompletedInstruction, TriggerState};
use crate::calendar::Calendar;
use crate::components::misfire_sweeper::{MisfireSweeper, MisfireSweeperConfig};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::job::JobDetail;
use crate::listener::{NoopSignaler, SchedulerSignaler};
use crate::lock::{LockManager, LockType};
use crate::managers::{
  join_release, FireManager, MisfireRecoveryResult, StorageManager, StoreContext,
  TriggerFiredResult,
};
use crate::repo::{
  CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
  SchedulerRepository, SchedulerState, TriggerRepository,
};
use crate::store::StoreConn;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 集群化的持久作业存储
/// The clustered persistent job store
pub struct JobStore {
  config: StoreConfig,
  ctx: StoreContext,
  storage: StorageManager,
  fire: FireManager,
  sweeper: tokio::sync::Mutex<Option<(Arc<MisfireSweeper>, JoinHandle<()>)>>,
}

impl JobStore {
  /// 校验配置、建立连接并组装全部子系统
  /// Validate the configuration, connect and assemble every subsystem
  pub async fn initialize(
    config: StoreConfig,
    signaler: Arc<dyn SchedulerSignaler>,
  ) -> Result<Self> {
    config.validate()?;
    let conn = StoreConn::connect(&config).await?;
    Ok(Self::assemble(config, conn, signaler))
  }

  /// 使用空信号接收器初始化
  /// Initialize with a no-op signal sink
  pub async fn initialize_silent(config: StoreConfig) -> Result<Self> {
    Self::initialize(config, Arc::new(NoopSignaler)).await
  }

  fn assemble(config: StoreConfig, conn: StoreConn, signaler: Arc<dyn SchedulerSignaler>) -> Self {
    let locks = Arc::new(LockManager::new(
      conn.clone(),
      config.instance_name.clone(),
      config.instance_id.clone(),
      config.lock_ttl,
      config.lock_poll_interval,
    ));
    let ctx = StoreContext {
      locks,
      jobs: JobRepository::new(conn.clone(), config.instance_name.clone()),
      triggers: TriggerRepository::new(conn.clone(), config.instance_name.clone()),
      calendars: CalendarRepository::new(conn.clone(), config.instance_name.clone()),
      fired: FiredTriggerRepository::new(conn.clone(), config.instance_name.clone()),
      paused: PausedGroupRepository::new(conn.clone(), config.instance_name.clone()),
      schedulers: SchedulerRepository::new(conn, config.instance_name.clone()),
      signaler,
      instance_id: config.instance_id.clone(),
      misfire_threshold: config.misfire_threshold,
      max_misfires_per_pass: config.max_misfires_per_pass,
    };
    Self {
      storage: StorageManager::new(ctx.clone()),
      fire: FireManager::new(ctx.clone()),
      ctx,
      config,
      sweeper: tokio::sync::Mutex::new(None),
    }
  }

  /// 配置访问器
  /// Configuration accessor
  pub fn config(&self) -> &StoreConfig {
    &self.config
  }

  // === 生命周期 ===
  // === Lifecycle ===

  /// 实例启动：写入注册信息、执行启动恢复并启动清扫器
  /// Instance startup: write the registration, run startup recovery and launch
  /// the sweeper
  pub async fn scheduler_started(&self, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::StateAccess, token).await?;
    let result = self
      .ctx
      .schedulers
      .upsert(
        &self.config.instance_id,
        SchedulerState::Started,
        Utc::now(),
        token,
      )
      .await;
    let release = self.ctx.locks.release(LockType::StateAccess).await;
    join_release(result, release)?;

    self.recover(token).await?;
    self.start_sweeper().await;
    Ok(())
  }

  /// 启动恢复：释放被崩溃卡住的状态，重建被中断的点火
  /// Startup recovery: free state stuck by a crash and rebuild interrupted
  /// firings
  async fn recover(&self, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.recover_inner(token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn recover_inner(&self, token: &CancellationToken) -> Result<()> {
    let freed = self
      .ctx
      .triggers
      .cas_state_for_instance(
        &[TriggerState::Acquired, TriggerState::Executing],
        TriggerState::Waiting,
        token,
      )
      .await?;
    if freed > 0 {
      tracing::info!(count = freed, "freed triggers stuck in acquired/executing");
    }
    self
      .ctx
      .triggers
      .cas_state_for_instance(&[TriggerState::PausedBlocked], TriggerState::Paused, token)
      .await?;

    // 为本实例上被中断且要求恢复的点火合成恢复触发器
    // Synthesize recovery triggers for this instance's interrupted firings
    // that request recovery
    let fired = self
      .ctx
      .fired
      .for_instance(&self.config.instance_id, token)
      .await?;
    let mut recovered = 0usize;
    for record in fired.iter().filter(|r| r.requests_recovery) {
      let Some(job) = self.ctx.jobs.get(&record.job_key, token).await? else {
        tracing::warn!(
          job = %record.job_key,
          trigger = %record.trigger_key,
          "job of interrupted firing no longer exists, skipping recovery"
        );
        continue;
      };
      let recovery = Trigger::recovery(
        &self.config.instance_id,
        record.job_key.clone(),
        &record.trigger_key,
        record.scheduled_fire_time,
        record.priority,
        job.data.clone(),
      );
      self
        .storage
        .store_trigger_inner(&recovery, false, true, token)
        .await?;
      recovered += 1;
    }
    if recovered > 0 {
      tracing::info!(count = recovered, "scheduled recovery triggers for interrupted firings");
    }

    self
      .ctx
      .fired
      .delete_for_instance(&self.config.instance_id, token)
      .await?;

    self.fire.recover_misfires_inner(true, token).await?;

    let completed = self
      .ctx
      .triggers
      .delete_in_state(TriggerState::Complete, token)
      .await?;
    if completed > 0 {
      tracing::debug!(count = completed, "removed completed triggers");
    }
    Ok(())
  }

  /// 启动后台清扫器；已在运行时为空操作
  /// Launch the background sweeper; a no-op when already running
  async fn start_sweeper(&self) {
    let mut slot = self.sweeper.lock().await;
    if slot.is_some() {
      return;
    }
    let sweeper = Arc::new(MisfireSweeper::new(
      self.fire.clone(),
      MisfireSweeperConfig {
        misfire_threshold: self.config.misfire_threshold,
        db_retry_interval: self.config.db_retry_interval,
        error_log_threshold: self.config.retryable_error_log_threshold,
      },
    ));
    let handle = sweeper.clone().start();
    *slot = Some((sweeper, handle));
  }

  /// 实例暂停
  /// Instance paused
  pub async fn scheduler_paused(&self, token: &CancellationToken) -> Result<()> {
    self.update_scheduler_state(SchedulerState::Paused, token).await
  }

  /// 实例恢复
  /// Instance resumed
  pub async fn scheduler_resumed(&self, token: &CancellationToken) -> Result<()> {
    self.update_scheduler_state(SchedulerState::Resumed, token).await
  }

  async fn update_scheduler_state(
    &self,
    state: SchedulerState,
    token: &CancellationToken,
  ) -> Result<()> {
    self.ctx.locks.acquire(LockType::StateAccess, token).await?;
    let result = self
      .ctx
      .schedulers
      .update_state(&self.config.instance_id, state, token)
      .await
      .map(|_| ());
    let release = self.ctx.locks.release(LockType::StateAccess).await;
    join_release(result, release)
  }

  /// 干净关闭：停止清扫器、等待其退出并删除注册信息
  /// Clean shutdown: stop the sweeper, wait for it to join and delete the
  /// registration
  ///
  /// 其它实例的状态不受影响。
  /// Other instances' state is left untouched.
  pub async fn shutdown(&self, token: &CancellationToken) -> Result<()> {
    if let Some((sweeper, handle)) = self.sweeper.lock().await.take() {
      sweeper.shutdown();
      let _ = handle.await;
    }

    self.ctx.locks.acquire(LockType::StateAccess, token).await?;
    let result = self
      .ctx
      .schedulers
      .delete(&self.config.instance_id, token)
      .await
      .map(|_| ());
    let release = self.ctx.locks.release(LockType::StateAccess).await;
    join_release(result, release)
  }

  /// 清空该 instance_name 的全部调度数据
  /// Truncate all scheduling data of this instance_name
  pub async fn clear_all_scheduling_data(&self, token: &CancellationToken) -> Result<()> {
    self.storage.clear_all_scheduling_data(token).await
  }

  // === 作业 ===
  // === Jobs ===

  /// 存储作业
  /// Store a job
  pub async fn store_job(
    &self,
    job: &JobDetail,
    replace: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    self.storage.store_job(job, replace, token).await
  }

  /// 在同一个临界区内存储作业及其触发器
  /// Store a job and its trigger within one critical section
  pub async fn store_job_and_trigger(
    &self,
    job: &JobDetail,
    trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<()> {
    self.storage.store_job_and_trigger(job, trigger, token).await
  }

  /// 读取作业
  /// Retrieve a job
  pub async fn retrieve_job(
    &self,
    key: &JobKey,
    token: &CancellationToken,
  ) -> Result<Option<JobDetail>> {
    self.ctx.jobs.get(key, token).await
  }

  /// 作业是否存在
  /// Whether the job exists
  pub async fn check_job_exists(&self, key: &JobKey, token: &CancellationToken) -> Result<bool> {
    self.ctx.jobs.exists(key, token).await
  }

  /// 删除作业及其触发器
  /// Remove a job and its triggers
  pub async fn remove_job(&self, key: &JobKey, token: &CancellationToken) -> Result<bool> {
    self.storage.remove_job(key, token).await
  }

  /// 按组匹配器列出作业键
  /// List job keys by group matcher
  pub async fn job_keys(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<JobKey>> {
    self.ctx.jobs.keys(matcher, token).await
  }

  /// 所有作业组名
  /// All job group names
  pub async fn job_group_names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self.ctx.jobs.group_names(token).await
  }

  /// 作业总数
  /// Total number of jobs
  pub async fn number_of_jobs(&self, token: &CancellationToken) -> Result<u64> {
    self.ctx.jobs.count(token).await
  }

  // === 触发器 ===
  // === Triggers ===

  /// 存储触发器
  /// Store a trigger
  pub async fn store_trigger(
    &self,
    trigger: &Trigger,
    replace: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    self.storage.store_trigger(trigger, replace, token).await
  }

  /// 读取触发器
  /// Retrieve a trigger
  pub async fn retrieve_trigger(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<Option<Trigger>> {
    self.ctx.triggers.get(key, token).await
  }

  /// 触发器是否存在
  /// Whether the trigger exists
  pub async fn check_trigger_exists(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.ctx.triggers.exists(key, token).await
  }

  /// 触发器当前状态
  /// Current trigger state
  pub async fn get_trigger_state(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<Option<TriggerState>> {
    self.ctx.triggers.get_state(key, token).await
  }

  /// 把出错的触发器复位
  /// Reset an errored trigger
  pub async fn reset_trigger_from_error_state(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.storage.reset_trigger_from_error(key, token).await
  }

  /// 删除触发器
  /// Remove a trigger
  pub async fn remove_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<bool> {
    self.storage.remove_trigger(key, token).await
  }

  /// 替换触发器
  /// Replace a trigger
  pub async fn replace_trigger(
    &self,
    key: &TriggerKey,
    new_trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.storage.replace_trigger(key, new_trigger, token).await
  }

  /// 按组匹配器列出触发器键
  /// List trigger keys by group matcher
  pub async fn trigger_keys(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<TriggerKey>> {
    self.ctx.triggers.keys(matcher, token).await
  }

  /// 所有触发器组名
  /// All trigger group names
  pub async fn trigger_group_names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self.ctx.triggers.group_names(token).await
  }

  /// 某作业的全部触发器
  /// Every trigger of one job
  pub async fn triggers_for_job(
    &self,
    key: &JobKey,
    token: &CancellationToken,
  ) -> Result<Vec<Trigger>> {
    self.ctx.triggers.for_job(key, token).await
  }

  /// 触发器总数
  /// Total number of triggers
  pub async fn number_of_triggers(&self, token: &CancellationToken) -> Result<u64> {
    self.ctx.triggers.count(token).await
  }

  // === 日历 ===
  // === Calendars ===

  /// 存储日历
  /// Store a calendar
  pub async fn store_calendar(
    &self,
    name: &str,
    calendar: &Calendar,
    replace: bool,
    update_triggers: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    self
      .storage
      .store_calendar(name, calendar, replace, update_triggers, token)
      .await
  }

  /// 读取日历
  /// Retrieve a calendar
  pub async fn retrieve_calendar(
    &self,
    name: &str,
    token: &CancellationToken,
  ) -> Result<Option<Calendar>> {
    self.ctx.calendars.get(name, token).await
  }

  /// 日历是否存在
  /// Whether the calendar exists
  pub async fn check_calendar_exists(
    &self,
    name: &str,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.ctx.calendars.exists(name, token).await
  }

  /// 删除日历
  /// Remove a calendar
  pub async fn remove_calendar(&self, name: &str, token: &CancellationToken) -> Result<bool> {
    self.storage.remove_calendar(name, token).await
  }

  /// 所有日历名称
  /// All calendar names
  pub async fn calendar_names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self.ctx.calendars.names(token).await
  }

  /// 日历总数
  /// Total number of calendars
  pub async fn number_of_calendars(&self, token: &CancellationToken) -> Result<u64> {
    self.ctx.calendars.count(token).await
  }

  // === 暂停与恢复 ===
  // === Pause and resume ===

  /// 暂停触发器
  /// Pause a trigger
  pub async fn pause_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self.storage.pause_trigger(key, token).await
  }

  /// 恢复触发器
  /// Resume a trigger
  pub async fn resume_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self.storage.resume_trigger(key, token).await
  }

  /// 按组匹配器暂停触发器
  /// Pause triggers by group matcher
  pub async fn pause_triggers(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.storage.pause_triggers(matcher, token).await
  }

  /// 按组匹配器恢复触发器
  /// Resume triggers by group matcher
  pub async fn resume_triggers(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.storage.resume_triggers(matcher, token).await
  }

  /// 暂停作业的全部触发器
  /// Pause every trigger of a job
  pub async fn pause_job(&self, key: &JobKey, token: &CancellationToken) -> Result<()> {
    self.storage.pause_job(key, token).await
  }

  /// 恢复作业的全部触发器
  /// Resume every trigger of a job
  pub async fn resume_job(&self, key: &JobKey, token: &CancellationToken) -> Result<()> {
    self.storage.resume_job(key, token).await
  }

  /// 按组匹配器暂停作业
  /// Pause jobs by group matcher
  pub async fn pause_jobs(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.storage.pause_jobs(matcher, token).await
  }

  /// 按组匹配器恢复作业
  /// Resume jobs by group matcher
  pub async fn resume_jobs(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.storage.resume_jobs(matcher, token).await
  }

  /// 暂停全部
  /// Pause all
  pub async fn pause_all(&self, token: &CancellationToken) -> Result<()> {
    self.storage.pause_all(token).await
  }

  /// 恢复全部
  /// Resume all
  pub async fn resume_all(&self, token: &CancellationToken) -> Result<()> {
    self.storage.resume_all(token).await
  }

  /// 当前暂停的触发器组
  /// Currently paused trigger groups
  pub async fn get_paused_trigger_groups(
    &self,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.ctx.paused.all(token).await
  }

  /// 作业组暂停查询（上游始终未实现）
  /// Job-group pause introspection (never implemented upstream)
  pub async fn is_job_group_paused(
    &self,
    _group: &str,
    _token: &CancellationToken,
  ) -> Result<bool> {
    Err(Error::NotImplemented("is_job_group_paused".into()))
  }

  /// 触发器组暂停查询（上游始终未实现）
  /// Trigger-group pause introspection (never implemented upstream)
  pub async fn is_trigger_group_paused(
    &self,
    _group: &str,
    _token: &CancellationToken,
  ) -> Result<bool> {
    Err(Error::NotImplemented("is_trigger_group_paused".into()))
  }

  // === 点火协议 ===
  // === Firing protocol ===

  /// 取得接下来可点火的触发器
  /// Acquire the next fireable triggers
  pub async fn acquire_next_triggers(
    &self,
    no_later_than: DateTime<Utc>,
    max_count: usize,
    time_window: Duration,
    token: &CancellationToken,
  ) -> Result<Vec<Trigger>> {
    self
      .fire
      .acquire_next_triggers(no_later_than, max_count, time_window, token)
      .await
  }

  /// 释放已取得的触发器
  /// Release an acquired trigger
  pub async fn release_acquired_trigger(
    &self,
    trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<()> {
    self.fire.release_acquired_trigger(trigger, token).await
  }

  /// 上报一批触发器进入点火
  /// Report a batch of triggers as fired
  pub async fn triggers_fired(
    &self,
    triggers: &[Trigger],
    token: &CancellationToken,
  ) -> Result<Vec<TriggerFiredResult>> {
    self.fire.triggers_fired(triggers, token).await
  }

  /// 上报作业执行完成
  /// Report job completion
  pub async fn triggered_job_complete(
    &self,
    trigger: &Trigger,
    job: &JobDetail,
    instruction: CompletedInstruction,
    token: &CancellationToken,
  ) -> Result<()> {
    self
      .fire
      .triggered_job_complete(trigger, job, instruction, token)
      .await
  }

  /// 手动执行一次 misfire 清扫
  /// Run one misfire sweep manually
  pub async fn recover_misfires(
    &self,
    token: &CancellationToken,
  ) -> Result<MisfireRecoveryResult> {
    self.fire.recover_misfires(false, token).await
  }
}

impl std::fmt::Debug for JobStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobStore")
      .field("instance_name", &self.config.instance_name)
      .field("instance_id", &self.config.instance_id)
      .finish_non_exhaustive()
  }
}
