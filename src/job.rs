//! 作业模块
//! Job module
//!
//! 定义了作业的领域模型
//! Defines the job domain model

use crate::base::keys::JobKey;
use serde::{Deserialize, Serialize};

/// 作业/触发器携带的键值数据映射
/// Key/value data map carried by jobs and triggers
pub type JobDataMap = serde_json::Map<String, serde_json::Value>;

/// 作业定义：被触发器引用的持久化工作单元
/// Job definition: a persistent unit of work referenced by triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
  /// 作业键
  /// Job key
  pub key: JobKey,
  /// 描述
  /// Description
  pub description: Option<String>,
  /// 作业类型标识，由外部工作池解析为可执行体
  /// Job type identifier, resolved to an executable by the external worker pool
  pub job_type: String,
  /// 为 false 时，没有剩余触发器的作业会被删除
  /// When false the job is deleted once it has no remaining triggers
  pub durable: bool,
  /// 为 true 时，执行完成后把数据映射写回存储
  /// When true the data map is written back to the store on completion
  pub persist_data_after_execution: bool,
  /// 为 true 时，同一作业同时最多只有一个触发器处于点火窗口
  /// When true at most one trigger of this job may be in the firing window
  pub concurrent_execution_disallowed: bool,
  /// 为 true 时，被中断的执行会在启动恢复中重新调度
  /// When true an interrupted execution is rescheduled during startup recovery
  pub requests_recovery: bool,
  /// 数据映射
  /// Data map
  pub data: JobDataMap,
}

impl JobDetail {
  /// 创建新的作业定义
  /// Create a new job definition
  pub fn new<T: Into<String>>(key: JobKey, job_type: T) -> Self {
    Self {
      key,
      description: None,
      job_type: job_type.into(),
      durable: false,
      persist_data_after_execution: false,
      concurrent_execution_disallowed: false,
      requests_recovery: false,
      data: JobDataMap::new(),
    }
  }

  /// 设置描述
  /// Set the description
  pub fn description<S: Into<String>>(mut self, description: S) -> Self {
    self.description = Some(description.into());
    self
  }

  /// 设置持久标志
  /// Set the durable flag
  pub fn durable(mut self, durable: bool) -> Self {
    self.durable = durable;
    self
  }

  /// 执行完成后写回数据映射
  /// Persist the data map after execution
  pub fn persist_data_after_execution(mut self, persist: bool) -> Self {
    self.persist_data_after_execution = persist;
    self
  }

  /// 禁止并发执行
  /// Disallow concurrent execution
  pub fn concurrent_execution_disallowed(mut self, disallowed: bool) -> Self {
    self.concurrent_execution_disallowed = disallowed;
    self
  }

  /// 请求崩溃恢复
  /// Request crash recovery
  pub fn requests_recovery(mut self, requests: bool) -> Self {
    self.requests_recovery = requests;
    self
  }

  /// 设置数据映射
  /// Set the data map
  pub fn data(mut self, data: JobDataMap) -> Self {
    self.data = data;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builder() {
    let job = JobDetail::new(JobKey::new("g", "j"), "email:deliver")
      .description("send mail")
      .durable(true)
      .concurrent_execution_disallowed(true)
      .requests_recovery(true);
    assert_eq!(job.key.to_string(), "g.j");
    assert_eq!(job.job_type, "email:deliver");
    assert!(job.durable);
    assert!(job.concurrent_execution_disallowed);
    assert!(job.requests_recovery);
    assert!(!job.persist_data_after_execution);
  }
}
