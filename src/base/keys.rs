//! 键模块
//! Key module
//!
//! 作业键、触发器键以及组匹配器
//! Job keys, trigger keys and the group matcher

use serde::{Deserialize, Serialize};
use std::fmt;

/// 作业键：在一个 instance_name 作用域内唯一标识一个作业
/// Job key: uniquely identifies a job within one instance_name scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
  /// 组名
  /// Group name
  pub group: String,
  /// 名称
  /// Name
  pub name: String,
}

impl JobKey {
  /// 创建新的作业键
  /// Create a new job key
  pub fn new<G: Into<String>, N: Into<String>>(group: G, name: N) -> Self {
    Self {
      group: group.into(),
      name: name.into(),
    }
  }
}

impl fmt::Display for JobKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.group, self.name)
  }
}

/// 触发器键：在一个 instance_name 作用域内唯一标识一个触发器
/// Trigger key: uniquely identifies a trigger within one instance_name scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
  /// 组名
  /// Group name
  pub group: String,
  /// 名称
  /// Name
  pub name: String,
}

impl TriggerKey {
  /// 创建新的触发器键
  /// Create a new trigger key
  pub fn new<G: Into<String>, N: Into<String>>(group: G, name: N) -> Self {
    Self {
      group: group.into(),
      name: name.into(),
    }
  }
}

impl fmt::Display for TriggerKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.group, self.name)
  }
}

/// 组匹配器
/// Group matcher
///
/// 对组名的匹配操作，编译为针对 group 列的 LIKE 模式
/// A match operation over group names, compiled to a LIKE pattern over the
/// group column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
  /// 精确相等
  /// Exact equality
  Equals(String),
  /// 前缀匹配
  /// Prefix match
  StartsWith(String),
  /// 后缀匹配
  /// Suffix match
  EndsWith(String),
  /// 包含匹配
  /// Containment match
  Contains(String),
  /// 匹配任何组
  /// Match any group
  Anything,
}

impl GroupMatcher {
  /// 编译为 LIKE 模式；`Anything` 不产生过滤条件
  /// Compile to a LIKE pattern; `Anything` produces no filter
  pub fn to_like_pattern(&self) -> Option<String> {
    match self {
      GroupMatcher::Equals(_) | GroupMatcher::Anything => None,
      GroupMatcher::StartsWith(s) => Some(format!("{}%", escape_like(s))),
      GroupMatcher::EndsWith(s) => Some(format!("%{}", escape_like(s))),
      GroupMatcher::Contains(s) => Some(format!("%{}%", escape_like(s))),
    }
  }

  /// 等值匹配的操作数
  /// The operand of an equality match
  pub fn equals_operand(&self) -> Option<&str> {
    match self {
      GroupMatcher::Equals(s) => Some(s),
      _ => None,
    }
  }

  /// 在内存中判定一个组名是否匹配
  /// Decide in memory whether a group name matches
  pub fn matches(&self, group: &str) -> bool {
    match self {
      GroupMatcher::Equals(s) => group == s,
      GroupMatcher::StartsWith(s) => group.starts_with(s.as_str()),
      GroupMatcher::EndsWith(s) => group.ends_with(s.as_str()),
      GroupMatcher::Contains(s) => group.contains(s.as_str()),
      GroupMatcher::Anything => true,
    }
  }
}

/// 转义 LIKE 模式中的通配符
/// Escape wildcard characters in a LIKE pattern
fn escape_like(s: &str) -> String {
  s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_display() {
    assert_eq!(JobKey::new("g1", "job").to_string(), "g1.job");
    assert_eq!(TriggerKey::new("g1", "trig").to_string(), "g1.trig");
  }

  #[test]
  fn test_matcher_patterns() {
    assert_eq!(GroupMatcher::Anything.to_like_pattern(), None);
    assert_eq!(GroupMatcher::Equals("g".into()).to_like_pattern(), None);
    assert_eq!(
      GroupMatcher::StartsWith("web".into()).to_like_pattern(),
      Some("web%".to_string())
    );
    assert_eq!(
      GroupMatcher::EndsWith("jobs".into()).to_like_pattern(),
      Some("%jobs".to_string())
    );
    assert_eq!(
      GroupMatcher::Contains("x_y".into()).to_like_pattern(),
      Some("%x\\_y%".to_string())
    );
  }

  #[test]
  fn test_matcher_matches() {
    assert!(GroupMatcher::Anything.matches("whatever"));
    assert!(GroupMatcher::Equals("g1".into()).matches("g1"));
    assert!(!GroupMatcher::Equals("g1".into()).matches("g10"));
    assert!(GroupMatcher::StartsWith("g".into()).matches("g10"));
    assert!(GroupMatcher::EndsWith("0".into()).matches("g10"));
    assert!(GroupMatcher::Contains("1".into()).matches("g10"));
  }
}
