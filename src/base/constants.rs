//! 常量定义
//! Constant definitions

/// 默认触发器优先级
/// Default trigger priority
pub const DEFAULT_PRIORITY: i32 = 5;

/// misfire 策略哨兵值：忽略 misfire 策略
/// Misfire policy sentinel: ignore the misfire policy
pub const MISFIRE_INSTRUCTION_IGNORE: i32 = -1;

/// 智能 misfire 策略（默认）
/// Smart misfire policy (default)
pub const MISFIRE_INSTRUCTION_SMART: i32 = 0;

/// 保留的"所有组已暂停"组名
/// Reserved group name marking "future groups paused by default"
pub const ALL_GROUPS_PAUSED: &str = "<ALL_PAUSED>";

/// 恢复触发器所在的组
/// Group that synthesized recovery triggers are stored under
pub const RECOVERING_GROUP: &str = "recovering";

/// 恢复触发器数据中携带原触发器组的键
/// Data map key carrying the original trigger group on a recovery trigger
pub const RECOVERING_TRIGGER_GROUP_KEY: &str = "quartz.recovering.trigger_group";

/// 恢复触发器数据中携带原触发器名的键
/// Data map key carrying the original trigger name on a recovery trigger
pub const RECOVERING_TRIGGER_NAME_KEY: &str = "quartz.recovering.trigger_name";

/// 版本信息
/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_constants() {
    assert_eq!(DEFAULT_PRIORITY, 5);
    assert_eq!(MISFIRE_INSTRUCTION_IGNORE, -1);
    assert_eq!(ALL_GROUPS_PAUSED, "<ALL_PAUSED>");
  }
}
