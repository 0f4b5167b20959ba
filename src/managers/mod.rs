//! 管理器模块
//! Manager module
//!
//! 存储管理器与点火管理器：二者都先取得 `TriggerAccess` 锁，
//! The storage and fire managers: both take the `TriggerAccess` lock first,
//! 再通过仓库以条件更新应用状态机转移，并在每条退出路径上释放锁。
//! then apply state-machine transitions through the repositories as
//! conditional updates, releasing the lock on every exit path.

use crate::error::Result;
use crate::listener::SchedulerSignaler;
use crate::lock::LockManager;
use crate::repo::{
  CalendarRepository, FiredTriggerRepository, JobRepository, PausedGroupRepository,
  SchedulerRepository, TriggerRepository,
};
use std::sync::Arc;
use std::time::Duration;

pub mod fire;
pub mod storage;

pub use fire::{FireManager, MisfireRecoveryResult, TriggerFiredBundle, TriggerFiredResult};
pub use storage::StorageManager;

/// 管理器共享的上下文
/// Context shared by the managers
#[derive(Clone)]
pub struct StoreContext {
  pub(crate) locks: Arc<LockManager>,
  pub(crate) jobs: JobRepository,
  pub(crate) triggers: TriggerRepository,
  pub(crate) calendars: CalendarRepository,
  pub(crate) fired: FiredTriggerRepository,
  pub(crate) paused: PausedGroupRepository,
  pub(crate) schedulers: SchedulerRepository,
  pub(crate) signaler: Arc<dyn SchedulerSignaler>,
  pub(crate) instance_id: String,
  pub(crate) misfire_threshold: Duration,
  pub(crate) max_misfires_per_pass: usize,
}

impl StoreContext {
  /// 加载可选的日历
  /// Load an optional calendar
  pub(crate) async fn load_calendar(
    &self,
    name: Option<&str>,
    token: &tokio_util::sync::CancellationToken,
  ) -> Result<Option<crate::calendar::Calendar>> {
    match name {
      Some(n) => self.calendars.get(n, token).await,
      None => Ok(None),
    }
  }

  /// 删除触发器行；非持久作业失去最后一个触发器时一并删除
  /// Delete a trigger row; a non-durable job losing its last trigger is
  /// removed with it
  pub(crate) async fn remove_trigger_and_cleanup(
    &self,
    key: &crate::base::keys::TriggerKey,
    token: &tokio_util::sync::CancellationToken,
  ) -> Result<bool> {
    let Some(trigger) = self.triggers.get(key, token).await? else {
      return Ok(false);
    };
    let removed = self.triggers.delete(key, token).await?;
    if removed {
      if let Some(job) = self.jobs.get(&trigger.job_key, token).await? {
        if !job.durable {
          let remaining = self.triggers.count_for_job(&job.key, token).await?;
          if remaining == 0 {
            self.jobs.delete(&job.key, token).await?;
          }
        }
      }
    }
    Ok(removed)
  }
}

/// 合并临界区结果与锁释放结果；临界区错误优先
/// Join the critical-section result with the release result; the critical
/// section's error wins
pub(crate) fn join_release<T>(result: Result<T>, release: Result<()>) -> Result<T> {
  match result {
    Err(e) => Err(e),
    Ok(value) => release.map(|_| value),
  }
}
