//! 触发器模块
//! Trigger module
//!
//! 定义了触发器的领域模型以及点火时间的推进逻辑
//! Defines the trigger domain model and fire-time advancement logic

use crate::base::constants::{
  DEFAULT_PRIORITY, MISFIRE_INSTRUCTION_IGNORE, MISFIRE_INSTRUCTION_SMART, RECOVERING_GROUP,
  RECOVERING_TRIGGER_GROUP_KEY, RECOVERING_TRIGGER_NAME_KEY,
};
use crate::base::keys::{JobKey, TriggerKey};
use crate::calendar::Calendar;
use crate::job::JobDataMap;
use crate::recurrence::Recurrence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 触发器：为某个作业安排点火的规则
/// Trigger: a rule that schedules fires of one job
///
/// 状态不属于领域模型；它只存在于存储的行里，由状态机裁决转移。
/// State is not part of the domain model; it lives only in the stored row and
/// transitions are adjudicated by the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
  /// 触发器键
  /// Trigger key
  pub key: TriggerKey,
  /// 被引用作业的键
  /// Key of the referenced job
  pub job_key: JobKey,
  /// 描述
  /// Description
  pub description: Option<String>,
  /// 下一次点火时间；`None` 表示终结
  /// Next fire time; `None` means terminal
  pub next_fire_time: Option<DateTime<Utc>>,
  /// 上一次点火时间
  /// Previous fire time
  pub previous_fire_time: Option<DateTime<Utc>>,
  /// 优先级；同一时刻数值更大者先点火
  /// Priority; on equal instants the higher value fires first
  pub priority: i32,
  /// 起始时间
  /// Start time
  pub start_time: DateTime<Utc>,
  /// 结束时间
  /// End time
  pub end_time: Option<DateTime<Utc>>,
  /// 引用的日历名
  /// Referenced calendar name
  pub calendar_name: Option<String>,
  /// misfire 策略；-1 表示忽略策略
  /// Misfire instruction; -1 means "ignore the policy"
  pub misfire_instruction: i32,
  /// 数据映射
  /// Data map
  pub data: JobDataMap,
  /// 重复规则
  /// Recurrence rule
  pub recurrence: Recurrence,
}

impl Trigger {
  /// 创建新的触发器，起始时间即为当前给定时间
  /// Create a new trigger starting at the given instant
  pub fn new(key: TriggerKey, job_key: JobKey, start_time: DateTime<Utc>, recurrence: Recurrence) -> Self {
    Self {
      key,
      job_key,
      description: None,
      next_fire_time: None,
      previous_fire_time: None,
      priority: DEFAULT_PRIORITY,
      start_time,
      end_time: None,
      calendar_name: None,
      misfire_instruction: MISFIRE_INSTRUCTION_SMART,
      data: JobDataMap::new(),
      recurrence,
    }
  }

  /// 设置描述
  /// Set the description
  pub fn description<S: Into<String>>(mut self, description: S) -> Self {
    self.description = Some(description.into());
    self
  }

  /// 设置优先级
  /// Set the priority
  pub fn priority(mut self, priority: i32) -> Self {
    self.priority = priority;
    self
  }

  /// 设置结束时间
  /// Set the end time
  pub fn end_time(mut self, end_time: DateTime<Utc>) -> Self {
    self.end_time = Some(end_time);
    self
  }

  /// 设置引用的日历
  /// Set the referenced calendar
  pub fn calendar_name<S: Into<String>>(mut self, name: S) -> Self {
    self.calendar_name = Some(name.into());
    self
  }

  /// 设置 misfire 策略
  /// Set the misfire instruction
  pub fn misfire_instruction(mut self, instruction: i32) -> Self {
    self.misfire_instruction = instruction;
    self
  }

  /// 设置数据映射
  /// Set the data map
  pub fn data(mut self, data: JobDataMap) -> Self {
    self.data = data;
    self
  }

  /// 计算首次点火时间并写入 `next_fire_time`
  /// Compute the first fire time and assign `next_fire_time`
  pub fn compute_first_fire_time(&mut self, calendar: Option<&Calendar>) {
    self.next_fire_time =
      self
        .recurrence
        .first_fire_time(self.start_time, self.end_time, calendar);
  }

  /// 点火推进：previous ← next，next ← 规则给出的后继时刻
  /// Fire advancement: previous ← next, next ← the rule's successor instant
  pub fn triggered(&mut self, calendar: Option<&Calendar>) {
    let fired_at = self.next_fire_time;
    self.previous_fire_time = fired_at;
    self.next_fire_time = fired_at.and_then(|t| {
      self
        .recurrence
        .next_fire_after(t, self.start_time, self.end_time, calendar)
    });
    self.recurrence.record_fire();
  }

  /// misfire 后重算点火时间；返回新的 `next_fire_time`
  /// Recompute the fire time after a misfire; returns the new `next_fire_time`
  pub fn update_after_misfire(
    &mut self,
    now: DateTime<Utc>,
    calendar: Option<&Calendar>,
  ) -> Option<DateTime<Utc>> {
    let next = self
      .recurrence
      .update_after_misfire(now, self.start_time, self.end_time, calendar);
    if next.is_some() {
      self.previous_fire_time = self.next_fire_time;
      self.next_fire_time = next;
    } else {
      self.next_fire_time = None;
    }
    next
  }

  /// 日历被替换后重算点火时间，套用 misfire 阈值策略
  /// Recompute fire times after the calendar was replaced, applying the
  /// misfire-threshold policy
  pub fn update_with_new_calendar(
    &mut self,
    calendar: Option<&Calendar>,
    misfire_threshold: std::time::Duration,
    now: DateTime<Utc>,
  ) {
    let recomputed = match self.previous_fire_time {
      Some(prev) => self
        .recurrence
        .next_fire_after(prev, self.start_time, self.end_time, calendar),
      None => self
        .recurrence
        .first_fire_time(self.start_time, self.end_time, calendar),
    };
    self.next_fire_time = recomputed;
    if let Some(next) = recomputed {
      let floor = now - chrono::Duration::milliseconds(misfire_threshold.as_millis() as i64);
      if next < floor {
        self.update_after_misfire(now, calendar);
      }
    }
  }

  /// 为被中断的点火合成一次性恢复触发器
  /// Synthesize a one-shot recovery trigger for an interrupted firing
  ///
  /// 恢复触发器忽略 misfire 策略：无论延误多久都必须点火。
  /// Recovery triggers ignore the misfire policy: they must fire no matter how
  /// late they are.
  pub fn recovery(
    instance_id: &str,
    job_key: JobKey,
    original: &TriggerKey,
    scheduled_fire_time: DateTime<Utc>,
    priority: i32,
    mut data: JobDataMap,
  ) -> Self {
    data.insert(
      RECOVERING_TRIGGER_GROUP_KEY.to_string(),
      serde_json::Value::String(original.group.clone()),
    );
    data.insert(
      RECOVERING_TRIGGER_NAME_KEY.to_string(),
      serde_json::Value::String(original.name.clone()),
    );
    let key = TriggerKey::new(
      RECOVERING_GROUP,
      format!("recover_{}_{}", instance_id, Uuid::new_v4()),
    );
    let mut trigger = Trigger::new(key, job_key, scheduled_fire_time, Recurrence::one_shot())
      .priority(priority)
      .misfire_instruction(MISFIRE_INSTRUCTION_IGNORE)
      .data(data);
    trigger.next_fire_time = Some(scheduled_fire_time);
    trigger
  }

  /// 是否为恢复触发器
  /// Whether this is a recovery trigger
  pub fn is_recovery(&self) -> bool {
    self.key.group == RECOVERING_GROUP
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::recurrence::REPEAT_INDEFINITELY;
  use chrono::TimeZone;
  use std::time::Duration;

  #[test]
  fn test_compute_and_advance() {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let mut trigger = Trigger::new(
      TriggerKey::new("g", "t"),
      JobKey::new("g", "j"),
      start,
      Recurrence::simple(Duration::from_secs(60), REPEAT_INDEFINITELY),
    );
    trigger.compute_first_fire_time(None);
    assert_eq!(trigger.next_fire_time, Some(start));

    trigger.triggered(None);
    assert_eq!(trigger.previous_fire_time, Some(start));
    assert_eq!(
      trigger.next_fire_time,
      Some(Utc.with_ymd_and_hms(2025, 6, 1, 10, 1, 0).unwrap())
    );
  }

  #[test]
  fn test_one_shot_terminates() {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let mut trigger = Trigger::new(
      TriggerKey::new("g", "t"),
      JobKey::new("g", "j"),
      start,
      Recurrence::one_shot(),
    );
    trigger.compute_first_fire_time(None);
    trigger.triggered(None);
    assert_eq!(trigger.previous_fire_time, Some(start));
    assert_eq!(trigger.next_fire_time, None);
  }

  #[test]
  fn test_recovery_trigger() {
    let scheduled = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let trigger = Trigger::recovery(
      "node-1",
      JobKey::new("g", "j"),
      &TriggerKey::new("g", "t"),
      scheduled,
      7,
      JobDataMap::new(),
    );
    assert!(trigger.is_recovery());
    assert_eq!(trigger.next_fire_time, Some(scheduled));
    assert_eq!(trigger.priority, 7);
    assert_eq!(trigger.misfire_instruction, MISFIRE_INSTRUCTION_IGNORE);
    assert_eq!(
      trigger.data.get(RECOVERING_TRIGGER_NAME_KEY).and_then(|v| v.as_str()),
      Some("t")
    );
  }
}
