//! 存储管理器
//! Storage manager
//!
//! 作业、触发器、日历与暂停组的全部写入口。每个公开操作恰好取得一次
//! Every write entry point for jobs, triggers, calendars and paused groups.
//! `TriggerAccess`；组合操作（如同时存作业和触发器）被压平为共享同一个
//! Each public operation takes `TriggerAccess` exactly once; composite
//! operations (such as storing a job and trigger together) are flattened onto
//! 临界区的内部函数。
//! internal functions sharing one critical section.

use super::{join_release, StoreContext};
use crate::base::constants::ALL_GROUPS_PAUSED;
use crate::base::keys::{GroupMatcher, JobKey, TriggerKey};
use crate::base::state::TriggerState;
use crate::calendar::Calendar;
use crate::error::{Error, Result};
use crate::job::JobDetail;
use crate::lock::LockType;
use crate::trigger::Trigger;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// 所有状态；用于"整组完成"等无条件批量转移
/// Every state; used by unconditional bulk transitions such as
/// "complete the whole group"
pub(crate) const ALL_STATES: [TriggerState; 7] = [
  TriggerState::Waiting,
  TriggerState::Acquired,
  TriggerState::Executing,
  TriggerState::Paused,
  TriggerState::PausedBlocked,
  TriggerState::Complete,
  TriggerState::Error,
];

/// 存储管理器
/// Storage manager
#[derive(Clone)]
pub struct StorageManager {
  ctx: StoreContext,
}

impl StorageManager {
  /// 创建新的存储管理器
  /// Create a new storage manager
  pub fn new(ctx: StoreContext) -> Self {
    Self { ctx }
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
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.ctx.jobs.save(job, replace, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 在同一个临界区内存储作业及其触发器
  /// Store a job and its trigger within one critical section
  pub async fn store_job_and_trigger(
    &self,
    job: &JobDetail,
    trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self.ctx.jobs.save(job, false, token).await?;
      self.store_trigger_inner(trigger, false, false, token).await
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 删除作业及引用它的全部触发器
  /// Remove a job and every trigger referencing it
  pub async fn remove_job(&self, key: &JobKey, token: &CancellationToken) -> Result<bool> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      for trigger in self.ctx.triggers.for_job(key, token).await? {
        self.ctx.triggers.delete(&trigger.key, token).await?;
      }
      self.ctx.jobs.delete(key, token).await
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
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
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.store_trigger_inner(trigger, replace, false, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 临界区内的触发器存储：引用校验、初始状态决策与首次点火时间计算
  /// In-critical-section trigger store: reference validation, initial-state
  /// policy and first-fire-time computation
  pub(crate) async fn store_trigger_inner(
    &self,
    trigger: &Trigger,
    replace: bool,
    force_state: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    let job = self
      .ctx
      .jobs
      .get(&trigger.job_key, token)
      .await?
      .ok_or_else(|| {
        Error::integrity(format!(
          "trigger {} references missing job {}",
          trigger.key, trigger.job_key
        ))
      })?;
    trigger.recurrence.validate()?;

    let existing = self.ctx.triggers.get_state(&trigger.key, token).await?;
    if existing.is_some() && !replace {
      return Err(Error::already_exists(format!("trigger {}", trigger.key)));
    }

    let state = match existing {
      // 替换保留既有状态，除非明确要求重新评估
      // Replacement keeps the existing state unless re-evaluation is forced
      Some(current) if !force_state => current,
      _ => self.initial_state(trigger, &job, token).await?,
    };

    let mut trigger = trigger.clone();
    if trigger.next_fire_time.is_none() {
      let calendar = self
        .ctx
        .load_calendar(trigger.calendar_name.as_deref(), token)
        .await?;
      trigger.compute_first_fire_time(calendar.as_ref());
      if trigger.next_fire_time.is_none() {
        return Err(Error::integrity(format!(
          "trigger {} will never fire",
          trigger.key
        )));
      }
    }

    self.ctx.triggers.save(&trigger, state, replace, token).await
  }

  /// 新触发器的初始状态策略
  /// Initial-state policy for a new trigger
  async fn initial_state(
    &self,
    trigger: &Trigger,
    job: &JobDetail,
    token: &CancellationToken,
  ) -> Result<TriggerState> {
    let group_paused = self.ctx.paused.is_paused(&trigger.key.group, token).await?;
    let all_paused = self.ctx.paused.all_paused(token).await?;
    if all_paused && !group_paused {
      // 让该组将来的恢复有明确定义
      // Makes a future resume of this group well-defined
      self.ctx.paused.add(&trigger.key.group, token).await?;
    }
    let paused = group_paused || all_paused;
    let blocked = job.concurrent_execution_disallowed
      && self
        .ctx
        .triggers
        .job_has_trigger_in_state(&job.key, TriggerState::Executing, token)
        .await?;
    Ok(match (paused, blocked) {
      (true, true) => TriggerState::PausedBlocked,
      (true, false) => TriggerState::Paused,
      (false, true) => TriggerState::Executing,
      (false, false) => TriggerState::Waiting,
    })
  }

  /// 删除触发器；非持久作业失去最后一个触发器时一并删除
  /// Remove a trigger; a non-durable job losing its last trigger is removed
  /// with it
  pub async fn remove_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<bool> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.remove_trigger_inner(key, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  pub(crate) async fn remove_trigger_inner(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.ctx.remove_trigger_and_cleanup(key, token).await
  }

  /// 用新触发器替换既有触发器；二者必须引用同一个作业
  /// Replace an existing trigger with a new one; both must reference the same
  /// job
  pub async fn replace_trigger(
    &self,
    key: &TriggerKey,
    new_trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let Some(old) = self.ctx.triggers.get(key, token).await? else {
        return Ok(false);
      };
      if old.job_key != new_trigger.job_key {
        return Err(Error::integrity(format!(
          "new trigger {} must reference job {}, not {}",
          new_trigger.key, old.job_key, new_trigger.job_key
        )));
      }
      self.ctx.triggers.delete(key, token).await?;
      self.store_trigger_inner(new_trigger, false, true, token).await?;
      Ok(true)
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 把出错的触发器复位回等待（组被暂停时回到暂停）
  /// Reset an errored trigger back to waiting (or paused when its group is
  /// paused)
  pub async fn reset_trigger_from_error(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<bool> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let to = if self.ctx.paused.is_paused(&key.group, token).await? {
        TriggerState::Paused
      } else {
        TriggerState::Waiting
      };
      self
        .ctx
        .triggers
        .cas_state(key, &[TriggerState::Error], to, token)
        .await
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  // === 日历 ===
  // === Calendars ===

  /// 存储日历
  /// Store a calendar
  ///
  /// `update_triggers` 为 true 时，用新日历为每个引用触发器重算点火时间。
  /// With `update_triggers` every referencing trigger gets its fire times
  /// recomputed against the new calendar.
  pub async fn store_calendar(
    &self,
    name: &str,
    calendar: &Calendar,
    replace: bool,
    update_triggers: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let existed = self.ctx.calendars.exists(name, token).await?;
      self.ctx.calendars.save(name, calendar, replace, token).await?;
      if existed && update_triggers {
        let now = Utc::now();
        for mut trigger in self.ctx.triggers.for_calendar(name, token).await? {
          if token.is_cancelled() {
            return Err(Error::Cancelled);
          }
          trigger.update_with_new_calendar(Some(calendar), self.ctx.misfire_threshold, now);
          self.ctx.triggers.update_fire_times(&trigger, token).await?;
        }
      }
      Ok(())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 删除日历；仍被触发器引用时拒绝
  /// Remove a calendar; rejected while any trigger references it
  pub async fn remove_calendar(&self, name: &str, token: &CancellationToken) -> Result<bool> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      if self.ctx.triggers.references_calendar(name, token).await? {
        return Err(Error::integrity(format!(
          "calendar {name} is still referenced by triggers"
        )));
      }
      self.ctx.calendars.delete(name, token).await
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  // === 暂停与恢复 ===
  // === Pause and resume ===

  /// 暂停单个触发器
  /// Pause one trigger
  pub async fn pause_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.pause_trigger_inner(key, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn pause_trigger_inner(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self
      .ctx
      .triggers
      .cas_state(
        key,
        &[TriggerState::Waiting, TriggerState::Acquired],
        TriggerState::Paused,
        token,
      )
      .await?;
    self
      .ctx
      .triggers
      .cas_state(
        key,
        &[TriggerState::Executing],
        TriggerState::PausedBlocked,
        token,
      )
      .await?;
    Ok(())
  }

  /// 恢复单个触发器
  /// Resume one trigger
  pub async fn resume_trigger(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.resume_trigger_inner(key, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn resume_trigger_inner(&self, key: &TriggerKey, token: &CancellationToken) -> Result<()> {
    self
      .ctx
      .triggers
      .cas_state(key, &[TriggerState::Paused], TriggerState::Waiting, token)
      .await?;
    self
      .ctx
      .triggers
      .cas_state(
        key,
        &[TriggerState::PausedBlocked],
        TriggerState::Executing,
        token,
      )
      .await?;
    Ok(())
  }

  /// 按组匹配器暂停触发器；返回被暂停的组名
  /// Pause triggers by group matcher; returns the paused group names
  pub async fn pause_triggers(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.pause_triggers_inner(matcher, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn pause_triggers_inner(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    let groups = self.ctx.triggers.groups(matcher, token).await?;
    for group in &groups {
      self.ctx.paused.add(group, token).await?;
    }
    self
      .ctx
      .triggers
      .cas_state_for_groups(
        matcher,
        &[TriggerState::Waiting, TriggerState::Acquired],
        TriggerState::Paused,
        token,
      )
      .await?;
    self
      .ctx
      .triggers
      .cas_state_for_groups(
        matcher,
        &[TriggerState::Executing],
        TriggerState::PausedBlocked,
        token,
      )
      .await?;
    Ok(groups)
  }

  /// 按组匹配器恢复触发器；返回被恢复的组名
  /// Resume triggers by group matcher; returns the resumed group names
  pub async fn resume_triggers(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.resume_triggers_inner(matcher, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn resume_triggers_inner(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    let groups = self.ctx.triggers.groups(matcher, token).await?;
    for group in &groups {
      self.ctx.paused.remove(group, token).await?;
    }
    self
      .ctx
      .triggers
      .cas_state_for_groups(matcher, &[TriggerState::Paused], TriggerState::Waiting, token)
      .await?;
    self
      .ctx
      .triggers
      .cas_state_for_groups(
        matcher,
        &[TriggerState::PausedBlocked],
        TriggerState::Executing,
        token,
      )
      .await?;
    Ok(groups)
  }

  /// 暂停一个作业的全部触发器
  /// Pause every trigger of one job
  pub async fn pause_job(&self, key: &JobKey, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self
        .ctx
        .triggers
        .cas_state_for_job(
          key,
          &[TriggerState::Waiting, TriggerState::Acquired],
          TriggerState::Paused,
          token,
        )
        .await?;
      self
        .ctx
        .triggers
        .cas_state_for_job(
          key,
          &[TriggerState::Executing],
          TriggerState::PausedBlocked,
          token,
        )
        .await?;
      Ok(())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 恢复一个作业的全部触发器
  /// Resume every trigger of one job
  pub async fn resume_job(&self, key: &JobKey, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self
        .ctx
        .triggers
        .cas_state_for_job(key, &[TriggerState::Paused], TriggerState::Waiting, token)
        .await?;
      self
        .ctx
        .triggers
        .cas_state_for_job(
          key,
          &[TriggerState::PausedBlocked],
          TriggerState::Executing,
          token,
        )
        .await?;
      Ok(())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 按组匹配器暂停作业；返回受影响的作业组名
  /// Pause jobs by group matcher; returns the affected job group names
  pub async fn pause_jobs(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let keys = self.ctx.jobs.keys(matcher, token).await?;
      let mut groups = std::collections::BTreeSet::new();
      for key in &keys {
        self
          .ctx
          .triggers
          .cas_state_for_job(
            key,
            &[TriggerState::Waiting, TriggerState::Acquired],
            TriggerState::Paused,
            token,
          )
          .await?;
        self
          .ctx
          .triggers
          .cas_state_for_job(
            key,
            &[TriggerState::Executing],
            TriggerState::PausedBlocked,
            token,
          )
          .await?;
        groups.insert(key.group.clone());
      }
      Ok(groups.into_iter().collect())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 按组匹配器恢复作业；返回受影响的作业组名
  /// Resume jobs by group matcher; returns the affected job group names
  pub async fn resume_jobs(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let keys = self.ctx.jobs.keys(matcher, token).await?;
      let mut groups = std::collections::BTreeSet::new();
      for key in &keys {
        self
          .ctx
          .triggers
          .cas_state_for_job(key, &[TriggerState::Paused], TriggerState::Waiting, token)
          .await?;
        self
          .ctx
          .triggers
          .cas_state_for_job(
            key,
            &[TriggerState::PausedBlocked],
            TriggerState::Executing,
            token,
          )
          .await?;
        groups.insert(key.group.clone());
      }
      Ok(groups.into_iter().collect())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 暂停全部触发器组并插入 `<ALL_PAUSED>` 标记
  /// Pause every trigger group and insert the `<ALL_PAUSED>` marker
  pub async fn pause_all(&self, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self.pause_triggers_inner(&GroupMatcher::Anything, token).await?;
      self.ctx.paused.add(ALL_GROUPS_PAUSED, token).await
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 恢复全部触发器组并清空暂停集合
  /// Resume every trigger group and clear the paused set
  pub async fn resume_all(&self, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self.resume_triggers_inner(&GroupMatcher::Anything, token).await?;
      // 匹配器只覆盖有触发器的组；把所有标记一并清掉
      // The matcher only covers groups that have triggers; drop every marker
      self.ctx.paused.clear(token).await?;
      Ok(())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  // === 清空 ===
  // === Truncation ===

  /// 清空该 instance_name 的全部调度数据
  /// Truncate all scheduling data of this instance_name
  pub async fn clear_all_scheduling_data(&self, token: &CancellationToken) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      self.ctx.triggers.clear(token).await?;
      self.ctx.jobs.clear(token).await?;
      self.ctx.calendars.clear(token).await?;
      self.ctx.fired.clear(token).await?;
      self.ctx.paused.clear(token).await?;
      self.ctx.schedulers.clear(token).await?;
      Ok(())
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }
}
