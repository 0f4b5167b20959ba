//! 基础模块
//! Base module
//!
//! 键、常量、触发器状态机以及时间转换辅助函数
//! Keys, constants, the trigger state machine and time conversion helpers

use chrono::{DateTime, TimeZone, Utc};

pub mod constants;
pub mod keys;
pub mod state;

/// 将 UTC 时间转换为 epoch 毫秒
/// Convert a UTC instant to epoch milliseconds
pub fn to_millis(t: DateTime<Utc>) -> i64 {
  t.timestamp_millis()
}

/// 从 epoch 毫秒还原 UTC 时间
/// Restore a UTC instant from epoch milliseconds
pub fn from_millis(ms: i64) -> DateTime<Utc> {
  match Utc.timestamp_millis_opt(ms) {
    chrono::LocalResult::Single(t) => t,
    _ => DateTime::<Utc>::MIN_UTC,
  }
}
