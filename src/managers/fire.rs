//! 点火管理器
//! Fire manager
//!
//! 取得 → 点火 → 完成协议，以及 misfire 清扫。跨集群的至多一次点火
//! The acquire → fire → complete protocol plus the misfire sweep. At-most-once
//! 由 `waiting → acquired` 与 `acquired → executing` 两次比较交换保证：
//! firing across the cluster is guaranteed by the `waiting → acquired` and
//! `acquired → executing` compare-and-sets:
//! 输掉交换的一方直接跳过候选者。
//! whoever loses the exchange simply skips the candidate.

use super::storage::ALL_STATES;
use super::{join_release, StoreContext};
use crate::base::keys::{GroupMatcher, TriggerKey};
use crate::base::state::{CompletedInstruction, TriggerState};
use crate::base::to_millis;
use crate::calendar::Calendar;
use crate::error::{Error, Result};
use crate::job::JobDetail;
use crate::lock::LockType;
use crate::repo::fired::FiredTrigger;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 点火成功后交给调用方的捆绑包
/// Bundle handed to the caller after a successful firing
#[derive(Debug, Clone)]
pub struct TriggerFiredBundle {
  /// 点火时间已推进的触发器快照
  /// Trigger snapshot with advanced fire times
  pub trigger: Trigger,
  /// 被点火的作业
  /// The fired job
  pub job: JobDetail,
  /// 生效的日历
  /// The calendar in effect
  pub calendar: Option<Calendar>,
  /// 唯一点火标识
  /// Unique firing id
  pub fired_instance_id: String,
  /// 实际点火时间
  /// Actual fire time
  pub fired_at: DateTime<Utc>,
  /// 计划点火时间
  /// Scheduled fire time
  pub scheduled_fire_time: DateTime<Utc>,
}

/// 批量点火中单个触发器的结果
/// Result of one trigger within a fired batch
#[derive(Debug, Clone)]
pub struct TriggerFiredResult {
  /// 触发器键
  /// Trigger key
  pub trigger_key: TriggerKey,
  /// 成功时的捆绑包
  /// Bundle on success
  pub bundle: Option<TriggerFiredBundle>,
  /// 失败时的错误描述
  /// Error description on failure
  pub error: Option<String>,
}

/// misfire 清扫的结果
/// Result of a misfire sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisfireRecoveryResult {
  /// 是否还有未处理的 misfire 触发器
  /// Whether more misfired triggers remain
  pub has_more: bool,
  /// 本次处理的触发器数量
  /// Number of triggers handled this pass
  pub count: usize,
  /// 重算后的最早点火时间
  /// Earliest recomputed fire time
  pub earliest_new_fire_time: Option<DateTime<Utc>>,
}

impl MisfireRecoveryResult {
  /// 没有 misfire 时的空结果
  /// Empty result when nothing misfired
  pub fn no_op() -> Self {
    Self {
      has_more: false,
      count: 0,
      earliest_new_fire_time: None,
    }
  }
}

/// 点火管理器
/// Fire manager
#[derive(Clone)]
pub struct FireManager {
  ctx: StoreContext,
}

impl FireManager {
  /// 创建新的点火管理器
  /// Create a new fire manager
  pub fn new(ctx: StoreContext) -> Self {
    Self { ctx }
  }

  /// 取得接下来可点火的触发器
  /// Acquire the next fireable triggers
  ///
  /// 候选者按 (next_fire_time asc, priority desc) 排序逐个做
  /// Candidates ordered by (next_fire_time asc, priority desc) each undergo a
  /// `waiting → acquired` 比较交换；输掉的候选者被跳过。取消只在候选者之间
  /// `waiting → acquired` compare-and-set; losers are skipped. Cancellation
  /// 生效，已取得的触发器不回滚，调用方必须点火或释放它们。
  /// takes effect only between candidates; already-acquired triggers are not
  /// rolled back and the caller must fire or release them.
  pub async fn acquire_next_triggers(
    &self,
    no_later_than: DateTime<Utc>,
    max_count: usize,
    time_window: Duration,
    token: &CancellationToken,
  ) -> Result<Vec<Trigger>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self
      .acquire_next_triggers_inner(no_later_than, max_count, time_window, token)
      .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn acquire_next_triggers_inner(
    &self,
    no_later_than: DateTime<Utc>,
    max_count: usize,
    time_window: Duration,
    token: &CancellationToken,
  ) -> Result<Vec<Trigger>> {
    let now = Utc::now();
    let upper_bound = to_millis(no_later_than) + time_window.as_millis() as i64;
    let misfire_floor = to_millis(now) - self.ctx.misfire_threshold.as_millis() as i64;
    let keys = self
      .ctx
      .triggers
      .acquirable_keys(upper_bound, misfire_floor, max_count as u64, token)
      .await?;

    let mut acquired = Vec::with_capacity(keys.len());
    for key in keys {
      // 已取得的触发器归调用方所有；这里的取消不回滚
      // Acquired triggers belong to the caller; cancelling here does not roll
      // them back
      if token.is_cancelled() {
        break;
      }
      let won = self
        .ctx
        .triggers
        .cas_state(
          &key,
          &[TriggerState::Waiting],
          TriggerState::Acquired,
          token,
        )
        .await?;
      if !won {
        // 另一个获取者或一次暂停抢先了
        // Another acquirer or a pause beat us
        continue;
      }
      if let Some(trigger) = self.ctx.triggers.get(&key, token).await? {
        acquired.push(trigger);
      }
    }
    Ok(acquired)
  }

  /// 释放已取得的触发器；触发器不再处于取得状态时为空操作
  /// Release an acquired trigger; a no-op when it is no longer acquired
  pub async fn release_acquired_trigger(
    &self,
    trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self
      .ctx
      .triggers
      .cas_state(
        &trigger.key,
        &[TriggerState::Acquired],
        TriggerState::Waiting,
        token,
      )
      .await
      .map(|_| ());
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 上报一批触发器进入点火
  /// Report a batch of triggers as fired
  ///
  /// 逐触发器记录错误；单个失败不影响批次中的其它触发器。
  /// Errors are recorded per trigger; one failure does not affect the rest of
  /// the batch.
  pub async fn triggers_fired(
    &self,
    triggers: &[Trigger],
    token: &CancellationToken,
  ) -> Result<Vec<TriggerFiredResult>> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = async {
      let mut results = Vec::with_capacity(triggers.len());
      for trigger in triggers {
        if token.is_cancelled() {
          return Err(Error::Cancelled);
        }
        match self.trigger_fired_inner(&trigger.key, token).await {
          Ok(bundle) => results.push(TriggerFiredResult {
            trigger_key: trigger.key.clone(),
            bundle: Some(bundle),
            error: None,
          }),
          Err(Error::Cancelled) => return Err(Error::Cancelled),
          Err(e) => {
            tracing::warn!(trigger = %trigger.key, error = %e, "trigger could not be fired");
            results.push(TriggerFiredResult {
              trigger_key: trigger.key.clone(),
              bundle: None,
              error: Some(e.to_string()),
            });
          }
        }
      }
      Ok(results)
    }
    .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn trigger_fired_inner(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<TriggerFiredBundle> {
    let (mut trigger, _) = self
      .ctx
      .triggers
      .get_with_state(key, token)
      .await?
      .ok_or_else(|| Error::integrity(format!("trigger {key} no longer exists")))?;
    let job = self
      .ctx
      .jobs
      .get(&trigger.job_key, token)
      .await?
      .ok_or_else(|| {
        Error::integrity(format!("job {} of trigger {key} no longer exists", trigger.job_key))
      })?;
    let calendar = self
      .ctx
      .load_calendar(trigger.calendar_name.as_deref(), token)
      .await?;
    if trigger.calendar_name.is_some() && calendar.is_none() {
      return Err(Error::integrity(format!(
        "calendar {:?} of trigger {key} no longer exists",
        trigger.calendar_name
      )));
    }

    let won = self
      .ctx
      .triggers
      .cas_state(
        key,
        &[TriggerState::Acquired],
        TriggerState::Executing,
        token,
      )
      .await?;
    if !won {
      return Err(Error::integrity(format!("trigger {key} is no longer acquired")));
    }

    let fired_at = Utc::now();
    let scheduled_fire_time = trigger.next_fire_time.unwrap_or(fired_at);
    trigger.triggered(calendar.as_ref());
    self.ctx.triggers.update_fire_times(&trigger, token).await?;

    let fired_instance_id = FiredTrigger::make_id(key, &self.ctx.instance_id, fired_at);
    let record = FiredTrigger {
      fired_instance_id: fired_instance_id.clone(),
      instance_id: self.ctx.instance_id.clone(),
      trigger_key: key.clone(),
      job_key: job.key.clone(),
      fired_at,
      scheduled_fire_time,
      priority: trigger.priority,
      requests_recovery: job.requests_recovery,
      concurrent_execution_disallowed: job.concurrent_execution_disallowed,
    };
    self.ctx.fired.insert(&record, token).await?;

    if job.concurrent_execution_disallowed {
      // 同一作业的其它触发器在执行期间被挡住
      // Other triggers of the same job are blocked for the execution window
      self
        .ctx
        .triggers
        .cas_state_for_job(&job.key, &[TriggerState::Waiting], TriggerState::Executing, token)
        .await?;
      self
        .ctx
        .triggers
        .cas_state_for_job(
          &job.key,
          &[TriggerState::Paused],
          TriggerState::PausedBlocked,
          token,
        )
        .await?;
    }

    Ok(TriggerFiredBundle {
      trigger,
      job,
      calendar,
      fired_instance_id,
      fired_at,
      scheduled_fire_time,
    })
  }

  /// 上报作业执行完成并应用完成指令
  /// Report job completion and apply the completion instruction
  pub async fn triggered_job_complete(
    &self,
    trigger: &Trigger,
    job: &JobDetail,
    instruction: CompletedInstruction,
    token: &CancellationToken,
  ) -> Result<()> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self
      .triggered_job_complete_inner(trigger, job, instruction, token)
      .await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  async fn triggered_job_complete_inner(
    &self,
    trigger: &Trigger,
    job: &JobDetail,
    instruction: CompletedInstruction,
    token: &CancellationToken,
  ) -> Result<()> {
    match instruction {
      CompletedInstruction::DeleteTrigger => {
        self.ctx.remove_trigger_and_cleanup(&trigger.key, token).await?;
      }
      CompletedInstruction::SetComplete => {
        self
          .ctx
          .triggers
          .cas_state(
            &trigger.key,
            &[TriggerState::Executing],
            TriggerState::Complete,
            token,
          )
          .await?;
      }
      CompletedInstruction::SetError => {
        self
          .ctx
          .triggers
          .cas_state(
            &trigger.key,
            &[TriggerState::Executing],
            TriggerState::Error,
            token,
          )
          .await?;
      }
      CompletedInstruction::SetAllGroupComplete => {
        self
          .ctx
          .triggers
          .cas_state_for_groups(
            &GroupMatcher::Equals(trigger.key.group.clone()),
            &ALL_STATES,
            TriggerState::Complete,
            token,
          )
          .await?;
      }
      CompletedInstruction::NoInstruction => {
        if let Some((stored, _)) = self.ctx.triggers.get_with_state(&trigger.key, token).await? {
          if stored.next_fire_time.is_none() {
            // 没有后续点火的触发器被终结
            // A trigger with no further fire is finalized
            let won = self
              .ctx
              .triggers
              .cas_state(
                &trigger.key,
                &[TriggerState::Executing],
                TriggerState::Complete,
                token,
              )
              .await?;
            if won {
              self.ctx.signaler.notify_trigger_finalized(&stored).await;
            }
          } else {
            self
              .ctx
              .triggers
              .cas_state(
                &trigger.key,
                &[TriggerState::Executing],
                TriggerState::Waiting,
                token,
              )
              .await?;
          }
        }
      }
    }

    self
      .ctx
      .fired
      .delete_for_trigger(&trigger.key, &self.ctx.instance_id, token)
      .await?;

    if job.persist_data_after_execution {
      self.ctx.jobs.update_data(&job.key, &job.data, token).await?;
    }

    if job.concurrent_execution_disallowed {
      self
        .ctx
        .triggers
        .cas_state_for_job(
          &job.key,
          &[TriggerState::PausedBlocked],
          TriggerState::Paused,
          token,
        )
        .await?;
      self
        .ctx
        .triggers
        .cas_state_for_job(&job.key, &[TriggerState::Executing], TriggerState::Waiting, token)
        .await?;
    }

    Ok(())
  }

  /// misfire 清扫
  /// Misfire sweep
  pub async fn recover_misfires(
    &self,
    recovering: bool,
    token: &CancellationToken,
  ) -> Result<MisfireRecoveryResult> {
    self.ctx.locks.acquire(LockType::TriggerAccess, token).await?;
    let result = self.recover_misfires_inner(recovering, token).await;
    let release = self.ctx.locks.release(LockType::TriggerAccess).await;
    join_release(result, release)
  }

  /// 临界区内的 misfire 清扫；启动恢复在自己的临界区里调用这里
  /// In-critical-section misfire sweep; startup recovery calls this inside its
  /// own critical section
  pub(crate) async fn recover_misfires_inner(
    &self,
    recovering: bool,
    token: &CancellationToken,
  ) -> Result<MisfireRecoveryResult> {
    let now = Utc::now();
    let misfire_floor = to_millis(now) - self.ctx.misfire_threshold.as_millis() as i64;

    let total = self.ctx.triggers.misfire_count(misfire_floor, token).await?;
    if total == 0 {
      return Ok(MisfireRecoveryResult::no_op());
    }

    let limit = self.ctx.max_misfires_per_pass as u64;
    let keys = self.ctx.triggers.misfired_keys(misfire_floor, limit, token).await?;
    let has_more = total > keys.len() as u64;

    let mut earliest: Option<DateTime<Utc>> = None;
    let mut handled = 0usize;
    for key in keys {
      if token.is_cancelled() {
        return Err(Error::Cancelled);
      }
      let Some((mut trigger, state)) = self.ctx.triggers.get_with_state(&key, token).await? else {
        continue;
      };
      if state != TriggerState::Waiting {
        // 计数与选择之间被别人转移走了
        // Transitioned away between counting and selection
        continue;
      }
      self.ctx.signaler.notify_trigger_misfired(&trigger).await;
      let calendar = self
        .ctx
        .load_calendar(trigger.calendar_name.as_deref(), token)
        .await?;
      match trigger.update_after_misfire(now, calendar.as_ref()) {
        None => {
          self.ctx.triggers.update_fire_times(&trigger, token).await?;
          let won = self
            .ctx
            .triggers
            .cas_state(&key, &[TriggerState::Waiting], TriggerState::Complete, token)
            .await?;
          if won {
            self.ctx.signaler.notify_trigger_finalized(&trigger).await;
          }
        }
        Some(next) => {
          self.ctx.triggers.update_fire_times(&trigger, token).await?;
          if !recovering {
            // 状态在选择时已是等待；转移由比较交换重申
            // Already waiting at selection time; the transition is re-asserted
            // by a compare-and-set
            self
              .ctx
              .triggers
              .cas_state(&key, &[TriggerState::Waiting], TriggerState::Waiting, token)
              .await?;
          }
          earliest = match earliest {
            Some(e) if e <= next => Some(e),
            _ => Some(next),
          };
        }
      }
      handled += 1;
    }

    Ok(MisfireRecoveryResult {
      has_more,
      count: handled,
      earliest_new_fire_time: earliest,
    })
  }
}
