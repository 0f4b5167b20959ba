//! 配置模块
//! Configuration module
//!
//! 定义了作业存储的配置选项
//! Defines configuration options for the job store

use crate::error::{Error, Result};
use std::time::Duration;

/// 作业存储配置
/// Job store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
  /// 数据库连接字符串
  /// Database connection string
  pub connection_string: String,
  /// 是否启用传输加密（对缺少 sslmode 的 PostgreSQL URL 追加 sslmode=require）
  /// Whether to enable transport encryption (appends sslmode=require to
  /// PostgreSQL URLs that lack an sslmode parameter)
  pub use_tls: bool,
  /// 物理调度器实例标识（重启后保持稳定）
  /// Physical scheduler instance identity (stable across restart)
  pub instance_id: String,
  /// 逻辑集群标识；相同 instance_name 的实例共享状态
  /// Logical cluster identity; instances sharing an instance_name share state
  pub instance_name: String,
  /// "迟到但可接受"与 misfire 之间的边界
  /// Boundary between "late but acceptable" and misfire
  pub misfire_threshold: Duration,
  /// 清扫器出错后的最小休眠时间
  /// Minimum sweeper sleep after an error
  pub db_retry_interval: Duration,
  /// 单次 misfire 清扫的批量上限
  /// Bound on one misfire sweep batch
  pub max_misfires_per_pass: usize,
  /// 每重复失败 N 次记录一次清扫器错误日志
  /// Log every Nth repeated sweeper failure
  pub retryable_error_log_threshold: u32,
  /// 分布式锁的存活时间
  /// Distributed lock time-to-live
  pub lock_ttl: Duration,
  /// 锁获取失败后的轮询间隔
  /// Poll interval after a failed lock acquisition
  pub lock_poll_interval: Duration,
  /// 瞬时错误的最大重试次数
  /// Maximum retry attempts for transient errors
  pub retry_max_attempts: u32,
  /// 重试退避的基准延迟
  /// Base delay of the retry backoff
  pub retry_base_delay: Duration,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      connection_string: String::new(),
      use_tls: false,
      instance_id: String::new(),
      instance_name: String::new(),
      misfire_threshold: Duration::from_secs(60),
      db_retry_interval: Duration::from_secs(15),
      max_misfires_per_pass: 20,
      retryable_error_log_threshold: 4,
      lock_ttl: Duration::from_secs(30),
      lock_poll_interval: Duration::from_secs(1),
      retry_max_attempts: 3,
      retry_base_delay: Duration::from_millis(200),
    }
  }
}

impl StoreConfig {
  /// 创建新的配置
  /// Create a new configuration
  pub fn new<C, I, N>(connection_string: C, instance_id: I, instance_name: N) -> Self
  where
    C: Into<String>,
    I: Into<String>,
    N: Into<String>,
  {
    Self {
      connection_string: connection_string.into(),
      instance_id: instance_id.into(),
      instance_name: instance_name.into(),
      ..Default::default()
    }
  }

  /// 启用传输加密
  /// Enable transport encryption
  pub fn use_tls(mut self, use_tls: bool) -> Self {
    self.use_tls = use_tls;
    self
  }

  /// 设置 misfire 阈值
  /// Set the misfire threshold
  pub fn misfire_threshold(mut self, threshold: Duration) -> Self {
    self.misfire_threshold = threshold;
    self
  }

  /// 设置清扫器出错后的最小休眠时间
  /// Set the minimum sweeper sleep after an error
  pub fn db_retry_interval(mut self, interval: Duration) -> Self {
    self.db_retry_interval = interval;
    self
  }

  /// 设置单次 misfire 清扫的批量上限
  /// Set the bound on one misfire sweep batch
  pub fn max_misfires_per_pass(mut self, max: usize) -> Self {
    self.max_misfires_per_pass = max.max(1);
    self
  }

  /// 设置锁的存活时间
  /// Set the lock time-to-live
  pub fn lock_ttl(mut self, ttl: Duration) -> Self {
    self.lock_ttl = ttl;
    self
  }

  /// 设置锁轮询间隔
  /// Set the lock poll interval
  pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
    self.lock_poll_interval = interval;
    self
  }

  /// 设置重试策略
  /// Set the retry policy
  pub fn retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
    self.retry_max_attempts = max_attempts.max(1);
    self.retry_base_delay = base_delay;
    self
  }

  /// 校验配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.connection_string.trim().is_empty() {
      return Err(Error::config("connection_string must not be empty"));
    }
    if self.instance_id.trim().is_empty() {
      return Err(Error::config("instance_id must not be empty"));
    }
    if self.instance_name.trim().is_empty() {
      return Err(Error::config("instance_name must not be empty"));
    }
    if self.lock_ttl.is_zero() {
      return Err(Error::config("lock_ttl must be positive"));
    }
    Ok(())
  }

  /// 应用 use_tls 后的实际连接字符串
  /// The effective connection string after applying use_tls
  pub fn effective_connection_string(&self) -> String {
    if self.use_tls
      && self.connection_string.starts_with("postgres")
      && !self.connection_string.contains("sslmode=")
    {
      let sep = if self.connection_string.contains('?') { '&' } else { '?' };
      return format!("{}{}sslmode=require", self.connection_string, sep);
    }
    self.connection_string.clone()
  }
}
