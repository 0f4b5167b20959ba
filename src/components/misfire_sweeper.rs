//! Misfire 清扫器
//! Misfire sweeper
//!
//! 单个协作式后台任务：反复调用 misfire 清扫，没有剩余 misfire 时
//! A single cooperative background task: repeatedly runs the misfire sweep and
//! 休眠到下一个阈值窗口，出错后至少休眠 db_retry_interval。
//! sleeps until the next threshold window when none remain, sleeping at least
//! db_retry_interval after an error.

use crate::components::ComponentLifecycle;
use crate::managers::FireManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 清扫周期的最小休眠
/// Minimum sleep of a sweep cycle
const MIN_SLEEP: Duration = Duration::from_millis(50);

/// Misfire 清扫器配置
/// Misfire sweeper configuration
#[derive(Debug, Clone)]
pub struct MisfireSweeperConfig {
  /// misfire 阈值，同时是无事可做时的扫描周期
  /// The misfire threshold, doubling as the idle scan period
  pub misfire_threshold: Duration,
  /// 出错后的最小休眠
  /// Minimum sleep after an error
  pub db_retry_interval: Duration,
  /// 每重复失败 N 次记录一次错误日志
  /// Log an error every Nth repeated failure
  pub error_log_threshold: u32,
}

/// Misfire 清扫器
/// Misfire sweeper
pub struct MisfireSweeper {
  fire: FireManager,
  config: MisfireSweeperConfig,
  shutdown_token: CancellationToken,
  done: Arc<AtomicBool>,
}

impl MisfireSweeper {
  /// 创建新的清扫器
  /// Create a new sweeper
  pub fn new(fire: FireManager, config: MisfireSweeperConfig) -> Self {
    Self {
      fire,
      config,
      shutdown_token: CancellationToken::new(),
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动清扫循环
  /// Start the sweep loop
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut consecutive_failures = 0u32;
      loop {
        if self.done.load(Ordering::Relaxed) || self.shutdown_token.is_cancelled() {
          break;
        }

        let started = tokio::time::Instant::now();
        let sleep = match self.fire.recover_misfires(false, &self.shutdown_token).await {
          Ok(result) => {
            consecutive_failures = 0;
            if result.count > 0 {
              tracing::debug!(
                count = result.count,
                has_more = result.has_more,
                "misfire sweep handled triggers"
              );
            }
            if result.has_more {
              // 还有积压，立刻继续
              // Backlog remains, continue immediately
              MIN_SLEEP
            } else {
              self
                .config
                .misfire_threshold
                .saturating_sub(started.elapsed())
                .max(MIN_SLEEP)
            }
          }
          Err(crate::error::Error::Cancelled) => break,
          Err(e) => {
            consecutive_failures += 1;
            if consecutive_failures % self.config.error_log_threshold.max(1) == 1
              || self.config.error_log_threshold <= 1
            {
              tracing::error!(
                failures = consecutive_failures,
                error = %e,
                "misfire sweep failed"
              );
            }
            self.config.db_retry_interval.max(MIN_SLEEP)
          }
        };

        tokio::select! {
          _ = self.shutdown_token.cancelled() => break,
          _ = tokio::time::sleep(sleep) => {}
        }
      }
      self.done.store(true, Ordering::Relaxed);
      tracing::debug!("misfire sweeper stopped");
    })
  }

  /// 请求清扫循环终止
  /// Request the sweep loop to terminate
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
    self.shutdown_token.cancel();
  }

  /// 检查是否已停止
  /// Check if it has stopped
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for MisfireSweeper {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    MisfireSweeper::start(self)
  }

  fn shutdown(&self) {
    MisfireSweeper::shutdown(self)
  }

  fn is_done(&self) -> bool {
    MisfireSweeper::is_done(self)
  }
}
