//! 监听器模块
//! Listener module
//!
//! 存储层消费的协作者接口：misfire 通知与触发器终结通知。
//! Collaborator interfaces consumed by the store: misfire notifications and
//! trigger finalization notifications.

use crate::trigger::Trigger;
use async_trait::async_trait;

/// 调度器信号接收器
/// Scheduler signal sink
///
/// 由上层调度器引擎实现；存储层在 misfire 清扫与终结时回调。
/// Implemented by the enclosing scheduler engine; the store calls back during
/// misfire sweeps and on finalization.
#[async_trait]
pub trait SchedulerSignaler: Send + Sync {
  /// 触发器发生 misfire
  /// A trigger misfired
  async fn notify_trigger_misfired(&self, trigger: &Trigger);

  /// 触发器已终结（不会再点火）
  /// A trigger was finalized (will never fire again)
  async fn notify_trigger_finalized(&self, trigger: &Trigger);
}

/// 丢弃所有信号的空实现
/// No-op implementation that drops every signal
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSignaler;

#[async_trait]
impl SchedulerSignaler for NoopSignaler {
  async fn notify_trigger_misfired(&self, _trigger: &Trigger) {}

  async fn notify_trigger_finalized(&self, _trigger: &Trigger) {}
}
