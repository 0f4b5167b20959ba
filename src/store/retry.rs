//! 重试模块
//! Retry module
//!
//! 所有写入都经过这里：瞬时错误按指数退避加抖动重试，永久错误立即传播。
//! Every write passes through here: transient errors retry with exponential
//! backoff plus jitter, permanent errors propagate immediately.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 抖动上限
/// Jitter cap
const MAX_JITTER: Duration = Duration::from_millis(1000);

/// 瞬时错误的重试策略
/// Retry policy for transient errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// 最大尝试次数
  /// Maximum number of attempts
  pub max_attempts: u32,
  /// 退避基准延迟
  /// Base backoff delay
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay: Duration::from_millis(200),
    }
  }
}

impl RetryPolicy {
  /// 创建新的重试策略
  /// Create a new retry policy
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      base_delay,
    }
  }

  /// 第 `attempt` 次失败后的退避延迟：`base · 2^(attempt-1)` 加均匀抖动
  /// Backoff delay after the `attempt`th failure: `base · 2^(attempt-1)` plus
  /// uniform jitter
  fn backoff_delay(&self, attempt: u32) -> Duration {
    let backoff = self.base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
    let cap = backoff.min(MAX_JITTER).as_millis() as u64;
    let jitter = if cap == 0 {
      0
    } else {
      rand::random::<u64>() % (cap + 1)
    };
    backoff + Duration::from_millis(jitter)
  }

  /// 执行一个可重建的操作，对瞬时错误重试
  /// Run a rebuildable operation, retrying transient errors
  ///
  /// 取消在每次尝试之前以及退避休眠期间生效。
  /// Cancellation takes effect before every attempt and during the backoff
  /// sleep.
  pub async fn run<T, F, Fut>(
    &self,
    token: &CancellationToken,
    operation: &str,
    mut f: F,
  ) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 1u32;
    loop {
      if token.is_cancelled() {
        return Err(Error::Cancelled);
      }
      match f().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_transient() && attempt < self.max_attempts => {
          let delay = self.backoff_delay(attempt);
          tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "transient store error, backing off"
          );
          tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
          }
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
