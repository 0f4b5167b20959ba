//! 触发器状态机
//! Trigger state machine
//!
//! 纯函数模块：枚举触发器状态并给出权威的转移规则。
//! Pure module: enumerates trigger states and the authoritative transition
//! rules. 存储管理器和点火管理器只通过 [`transition`] 决定合法转移。
//! Storage and fire managers decide legal transitions only through
//! [`transition`].

use std::fmt;
use std::str::FromStr;

/// 触发器状态
/// Trigger state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerState {
  /// 等待下一次点火
  /// Waiting for its next fire
  Waiting,
  /// 已被某个实例取得
  /// Acquired by an instance
  Acquired,
  /// 正在执行（上游历史上称为 Blocked）
  /// Executing (historically named Blocked upstream)
  Executing,
  /// 已暂停
  /// Paused
  Paused,
  /// 执行中被暂停
  /// Paused while executing
  PausedBlocked,
  /// 已完成，不再点火
  /// Complete, will not fire again
  Complete,
  /// 出错
  /// Errored
  Error,
}

impl TriggerState {
  /// 转换为存储用字符串
  /// Convert to the stored string form
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Waiting => "waiting",
      Self::Acquired => "acquired",
      Self::Executing => "executing",
      Self::Paused => "paused",
      Self::PausedBlocked => "paused_blocked",
      Self::Complete => "complete",
      Self::Error => "error",
    }
  }
}

impl fmt::Display for TriggerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TriggerState {
  type Err = ();

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "waiting" => Ok(Self::Waiting),
      "acquired" => Ok(Self::Acquired),
      "executing" => Ok(Self::Executing),
      "paused" => Ok(Self::Paused),
      "paused_blocked" => Ok(Self::PausedBlocked),
      "complete" => Ok(Self::Complete),
      "error" => Ok(Self::Error),
      _ => Err(()),
    }
  }
}

/// 状态机事件
/// State machine events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
  /// 实例取得触发器
  /// An instance acquires the trigger
  Acquire,
  /// 释放已取得的触发器
  /// Release an acquired trigger
  Release,
  /// 把触发器交给工作池
  /// Hand the trigger to the worker pool
  Fire,
  /// 暂停
  /// Pause
  Pause,
  /// 恢复
  /// Resume
  Resume,
  /// 从错误状态复位
  /// Reset out of the error state
  ResetFromError,
}

/// 作业执行完成后的处理指令
/// Instruction applied when a job execution completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedInstruction {
  /// 默认：回到等待状态
  /// Default: return to waiting
  NoInstruction,
  /// 删除触发器
  /// Delete the trigger
  DeleteTrigger,
  /// 标记触发器完成
  /// Mark the trigger complete
  SetComplete,
  /// 标记触发器出错
  /// Mark the trigger errored
  SetError,
  /// 将该组内所有触发器标记完成
  /// Mark every trigger in the group complete
  SetAllGroupComplete,
}

/// 计算一次状态转移；非法转移返回 `None`
/// Compute one state transition; illegal transitions return `None`
pub fn transition(current: TriggerState, event: TriggerEvent) -> Option<TriggerState> {
  use TriggerEvent::*;
  use TriggerState::*;
  match (current, event) {
    (Waiting, Acquire) => Some(Acquired),
    (Acquired, Release) => Some(Waiting),
    (Acquired, Fire) => Some(Executing),
    (Waiting, Pause) | (Acquired, Pause) => Some(Paused),
    (Executing, Pause) => Some(PausedBlocked),
    (Paused, Resume) => Some(Waiting),
    // 恢复时保留"作业正在执行"信号，而不是回到等待
    // Resume preserves the executing signal instead of returning to waiting
    (PausedBlocked, Resume) => Some(Executing),
    (Error, ResetFromError) => Some(Waiting),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_state_string_round_trip() {
    for state in [
      TriggerState::Waiting,
      TriggerState::Acquired,
      TriggerState::Executing,
      TriggerState::Paused,
      TriggerState::PausedBlocked,
      TriggerState::Complete,
      TriggerState::Error,
    ] {
      assert_eq!(state.as_str().parse::<TriggerState>(), Ok(state));
    }
    assert!("bogus".parse::<TriggerState>().is_err());
  }

  #[test]
  fn test_fire_path() {
    use TriggerEvent::*;
    use TriggerState::*;
    assert_eq!(transition(Waiting, Acquire), Some(Acquired));
    assert_eq!(transition(Acquired, Fire), Some(Executing));
    assert_eq!(transition(Acquired, Release), Some(Waiting));
    // 取得之前不能点火，也不能直接释放等待中的触发器
    // Cannot fire before acquiring, nor release a waiting trigger
    assert_eq!(transition(Waiting, Fire), None);
    assert_eq!(transition(Waiting, Release), None);
    assert_eq!(transition(Executing, Acquire), None);
  }

  #[test]
  fn test_pause_resume() {
    use TriggerEvent::*;
    use TriggerState::*;
    assert_eq!(transition(Waiting, Pause), Some(Paused));
    assert_eq!(transition(Acquired, Pause), Some(Paused));
    assert_eq!(transition(Executing, Pause), Some(PausedBlocked));
    assert_eq!(transition(Paused, Resume), Some(Waiting));
    assert_eq!(transition(PausedBlocked, Resume), Some(Executing));
    assert_eq!(transition(Complete, Pause), None);
    assert_eq!(transition(Paused, Pause), None);
  }

  #[test]
  fn test_error_reset() {
    use TriggerEvent::*;
    use TriggerState::*;
    assert_eq!(transition(Error, ResetFromError), Some(Waiting));
    assert_eq!(transition(Waiting, ResetFromError), None);
    assert_eq!(transition(Error, Acquire), None);
  }
}
