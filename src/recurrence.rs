//! 重复规则模块
//! Recurrence module
//!
//! 以带标签的变体表示触发器的重复规则，并把解析与时间运算同存储层隔离。
//! Represents trigger recurrence as a tagged variant and keeps parsing and
//! time arithmetic isolated from the store. 存储层只保存计算结果
//! （next_fire_time），从不解释规则本身。
//! The store persists only the computed result (next_fire_time) and never
//! interprets the rule itself.

use crate::calendar::Calendar;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Months, NaiveTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 无限重复的哨兵值
/// Sentinel for indefinite repetition
pub const REPEAT_INDEFINITELY: i32 = -1;

/// 被日历排除时向后扫描的最大次数
/// Maximum forward scans past calendar-excluded instants
const CALENDAR_SCAN_LIMIT: u32 = 366;

/// 月/年间隔计算的迭代上限
/// Iteration bound for month/year interval arithmetic
const MONTH_SCAN_LIMIT: u32 = 20_000;

/// 日历间隔的单位
/// Unit of a calendar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
  Second,
  Minute,
  Hour,
  Day,
  Week,
  Month,
  Year,
}

/// 触发器的重复规则
/// Trigger recurrence rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
  /// 固定间隔重复
  /// Fixed-interval repetition
  Simple {
    /// 重复间隔（毫秒）
    /// Repeat interval in milliseconds
    repeat_interval_ms: i64,
    /// 重复次数；-1 表示无限
    /// Repeat count; -1 means indefinite
    repeat_count: i32,
    /// 已触发次数
    /// Number of completed fires
    #[serde(default)]
    times_triggered: i32,
  },
  /// cron 表达式
  /// Cron expression
  Cron {
    /// 表达式文本
    /// Expression text
    expression: String,
  },
  /// 日历间隔（支持月/年等不定长单位）
  /// Calendar interval (supports variable-length units such as months/years)
  CalendarInterval {
    /// 间隔数量
    /// Interval amount
    interval: u32,
    /// 间隔单位
    /// Interval unit
    unit: IntervalUnit,
  },
  /// 每日时间窗口间隔
  /// Daily time-window interval
  DailyTimeInterval {
    /// 窗口起点（当天第几秒）
    /// Window start (second of day)
    start_second_of_day: u32,
    /// 窗口终点（当天第几秒，不含）
    /// Window end (second of day, exclusive)
    end_second_of_day: u32,
    /// 窗口内的点火间隔（秒）
    /// Fire interval within the window, in seconds
    interval_seconds: u32,
    /// 允许的星期集合；0 = 周一 … 6 = 周日，空集表示每天
    /// Allowed weekdays; 0 = Monday … 6 = Sunday, empty means every day
    #[serde(default)]
    days_of_week: Vec<u32>,
  },
}

impl Recurrence {
  /// 只点火一次的简单规则
  /// A simple rule that fires exactly once
  pub fn one_shot() -> Self {
    Recurrence::Simple {
      repeat_interval_ms: 0,
      repeat_count: 0,
      times_triggered: 0,
    }
  }

  /// 固定间隔重复的简单规则
  /// A simple rule repeating at a fixed interval
  pub fn simple(interval: std::time::Duration, repeat_count: i32) -> Self {
    Recurrence::Simple {
      repeat_interval_ms: interval.as_millis() as i64,
      repeat_count,
      times_triggered: 0,
    }
  }

  /// 从 cron 表达式构造
  /// Construct from a cron expression
  pub fn cron<S: Into<String>>(expression: S) -> Self {
    Recurrence::Cron {
      expression: expression.into(),
    }
  }

  /// 校验规则本身（表达式可解析、间隔为正等）
  /// Validate the rule itself (parsable expression, positive intervals, ...)
  pub fn validate(&self) -> Result<()> {
    match self {
      Recurrence::Simple {
        repeat_interval_ms,
        repeat_count,
        ..
      } => {
        if *repeat_count != 0 && *repeat_interval_ms <= 0 {
          return Err(Error::integrity(
            "simple recurrence with repetition requires a positive interval",
          ));
        }
        Ok(())
      }
      Recurrence::Cron { expression } => Schedule::from_str(expression)
        .map(|_| ())
        .map_err(|e| Error::integrity(format!("invalid cron expression {expression:?}: {e}"))),
      Recurrence::CalendarInterval { interval, .. } => {
        if *interval == 0 {
          return Err(Error::integrity("calendar interval must be positive"));
        }
        Ok(())
      }
      Recurrence::DailyTimeInterval {
        start_second_of_day,
        end_second_of_day,
        interval_seconds,
        days_of_week,
      } => {
        if *interval_seconds == 0 {
          return Err(Error::integrity("daily time interval must be positive"));
        }
        if start_second_of_day >= end_second_of_day || *end_second_of_day > 86_400 {
          return Err(Error::integrity("daily time window is empty or out of range"));
        }
        if days_of_week.iter().any(|d| *d > 6) {
          return Err(Error::integrity("weekday numbers must be in 0..=6"));
        }
        Ok(())
      }
    }
  }

  /// 记录一次点火（维护 Simple 规则的触发计数）
  /// Record one fire (maintains the fire count of simple rules)
  pub fn record_fire(&mut self) {
    if let Recurrence::Simple { times_triggered, .. } = self {
      *times_triggered += 1;
    }
  }

  /// 起始时间之后（含）的首个点火时刻
  /// First fire instant at or after the start time
  pub fn first_fire_time(
    &self,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    calendar: Option<&Calendar>,
  ) -> Option<DateTime<Utc>> {
    self.next_fire_after(start - ChronoDuration::milliseconds(1), start, end, calendar)
  }

  /// 严格晚于 `after` 的下一个点火时刻，日历排除已应用
  /// Next fire instant strictly after `after`, with calendar exclusions applied
  pub fn next_fire_after(
    &self,
    after: DateTime<Utc>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    calendar: Option<&Calendar>,
  ) -> Option<DateTime<Utc>> {
    let mut candidate = self.next_after_raw(after, start, end)?;
    if let Some(cal) = calendar {
      let mut scans = 0;
      while !cal.is_time_included(candidate) {
        scans += 1;
        if scans > CALENDAR_SCAN_LIMIT {
          return None;
        }
        candidate = self.next_after_raw(candidate, start, end)?;
      }
    }
    Some(candidate)
  }

  /// misfire 之后重新计算下一个点火时刻：当前时刻（含）之后的首个合法时刻
  /// Recompute the next fire after a misfire: the first legal instant at or
  /// after `now`
  pub fn update_after_misfire(
    &self,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    calendar: Option<&Calendar>,
  ) -> Option<DateTime<Utc>> {
    self.next_fire_after(now - ChronoDuration::milliseconds(1), start, end, calendar)
  }

  /// 未应用日历的原始下一个点火时刻
  /// Raw next fire instant without calendar exclusions
  fn next_after_raw(
    &self,
    after: DateTime<Utc>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
  ) -> Option<DateTime<Utc>> {
    let candidate = match self {
      Recurrence::Simple {
        repeat_interval_ms,
        repeat_count,
        ..
      } => {
        if after < start {
          Some(start)
        } else if *repeat_interval_ms <= 0 {
          // 一次性触发器在起始时间之后没有后续点火
          // A one-shot trigger has no fire past its start time
          None
        } else {
          let elapsed = (after - start).num_milliseconds();
          let k = elapsed / repeat_interval_ms + 1;
          if *repeat_count != REPEAT_INDEFINITELY && k > *repeat_count as i64 {
            None
          } else {
            Some(start + ChronoDuration::milliseconds(k * repeat_interval_ms))
          }
        }
      }
      Recurrence::Cron { expression } => {
        let schedule = Schedule::from_str(expression).ok()?;
        let floor = if after < start {
          start - ChronoDuration::milliseconds(1)
        } else {
          after
        };
        schedule.after(&floor).next()
      }
      Recurrence::CalendarInterval { interval, unit } => {
        calendar_interval_after(after, start, *interval, *unit)
      }
      Recurrence::DailyTimeInterval {
        start_second_of_day,
        end_second_of_day,
        interval_seconds,
        days_of_week,
      } => daily_interval_after(
        after,
        start,
        *start_second_of_day,
        *end_second_of_day,
        (*interval_seconds).max(1),
        days_of_week,
      ),
    }?;
    match end {
      Some(e) if candidate > e => None,
      _ => Some(candidate),
    }
  }
}

/// 日历间隔规则的原始下一个时刻
/// Raw next instant of a calendar-interval rule
fn calendar_interval_after(
  after: DateTime<Utc>,
  start: DateTime<Utc>,
  interval: u32,
  unit: IntervalUnit,
) -> Option<DateTime<Utc>> {
  if after < start {
    return Some(start);
  }
  match unit {
    IntervalUnit::Second | IntervalUnit::Minute | IntervalUnit::Hour | IntervalUnit::Day
    | IntervalUnit::Week => {
      let step_ms = match unit {
        IntervalUnit::Second => 1_000i64,
        IntervalUnit::Minute => 60_000,
        IntervalUnit::Hour => 3_600_000,
        IntervalUnit::Day => 86_400_000,
        IntervalUnit::Week => 7 * 86_400_000,
        _ => unreachable!(),
      } * interval as i64;
      let elapsed = (after - start).num_milliseconds();
      let k = elapsed / step_ms + 1;
      Some(start + ChronoDuration::milliseconds(k * step_ms))
    }
    IntervalUnit::Month | IntervalUnit::Year => {
      let months_per_step = match unit {
        IntervalUnit::Month => interval,
        _ => interval * 12,
      };
      let mut candidate = start;
      for _ in 0..MONTH_SCAN_LIMIT {
        candidate = candidate.checked_add_months(Months::new(months_per_step))?;
        if candidate > after {
          return Some(candidate);
        }
      }
      None
    }
  }
}

/// 每日时间窗口规则的原始下一个时刻
/// Raw next instant of a daily time-window rule
fn daily_interval_after(
  after: DateTime<Utc>,
  start: DateTime<Utc>,
  start_second: u32,
  end_second: u32,
  interval_seconds: u32,
  days_of_week: &[u32],
) -> Option<DateTime<Utc>> {
  use chrono::Datelike;
  let floor = if after < start {
    start - ChronoDuration::milliseconds(1)
  } else {
    after
  };
  let mut date = floor.date_naive();
  // 最多向前扫描两年
  // Scan forward at most two years
  for _ in 0..=(366 * 2) {
    let day_allowed =
      days_of_week.is_empty() || days_of_week.contains(&date.weekday().num_days_from_monday());
    if day_allowed {
      let mut second = start_second;
      while second < end_second {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(second, 0)?;
        let candidate = date.and_time(time).and_utc();
        if candidate > floor && candidate >= start {
          return Some(candidate);
        }
        second += interval_seconds;
      }
    }
    date = date.succ_opt()?;
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use std::time::Duration;

  fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
  }

  #[test]
  fn test_one_shot_fires_once() {
    let rec = Recurrence::one_shot();
    let start = at(2025, 6, 1, 10, 0, 0);
    assert_eq!(rec.first_fire_time(start, None, None), Some(start));
    assert_eq!(rec.next_fire_after(start, start, None, None), None);
  }

  #[test]
  fn test_simple_interval_sequence() {
    let rec = Recurrence::simple(Duration::from_secs(60), REPEAT_INDEFINITELY);
    let start = at(2025, 6, 1, 10, 0, 0);
    assert_eq!(rec.first_fire_time(start, None, None), Some(start));
    assert_eq!(
      rec.next_fire_after(start, start, None, None),
      Some(at(2025, 6, 1, 10, 1, 0))
    );
    // 从序列中间的任意时刻恢复到下一个格点
    // Recovers onto the next grid point from any instant mid-sequence
    assert_eq!(
      rec.next_fire_after(at(2025, 6, 1, 10, 2, 30), start, None, None),
      Some(at(2025, 6, 1, 10, 3, 0))
    );
  }

  #[test]
  fn test_simple_repeat_count_exhaustion() {
    // 总共点火 3 次：start、+1m、+2m
    // Fires 3 times in total: start, +1m, +2m
    let rec = Recurrence::simple(Duration::from_secs(60), 2);
    let start = at(2025, 6, 1, 10, 0, 0);
    assert_eq!(
      rec.next_fire_after(at(2025, 6, 1, 10, 1, 0), start, None, None),
      Some(at(2025, 6, 1, 10, 2, 0))
    );
    assert_eq!(rec.next_fire_after(at(2025, 6, 1, 10, 2, 0), start, None, None), None);
  }

  #[test]
  fn test_simple_end_time() {
    let rec = Recurrence::simple(Duration::from_secs(60), REPEAT_INDEFINITELY);
    let start = at(2025, 6, 1, 10, 0, 0);
    let end = at(2025, 6, 1, 10, 1, 0);
    assert_eq!(
      rec.next_fire_after(start, start, Some(end), None),
      Some(at(2025, 6, 1, 10, 1, 0))
    );
    assert_eq!(rec.next_fire_after(end, start, Some(end), None), None);
  }

  #[test]
  fn test_cron_next() {
    // 每小时第 0 分 0 秒
    // Second 0 of minute 0, every hour
    let rec = Recurrence::cron("0 0 * * * *");
    let start = at(2025, 6, 1, 10, 30, 0);
    assert_eq!(
      rec.first_fire_time(start, None, None),
      Some(at(2025, 6, 1, 11, 0, 0))
    );
    assert_eq!(
      rec.next_fire_after(at(2025, 6, 1, 11, 0, 0), start, None, None),
      Some(at(2025, 6, 1, 12, 0, 0))
    );
  }

  #[test]
  fn test_cron_validation() {
    assert!(Recurrence::cron("0 0 * * * *").validate().is_ok());
    assert!(Recurrence::cron("not a cron").validate().is_err());
  }

  #[test]
  fn test_calendar_interval_months() {
    let rec = Recurrence::CalendarInterval {
      interval: 1,
      unit: IntervalUnit::Month,
    };
    let start = at(2025, 1, 31, 9, 0, 0);
    // chrono 的月份算术会截断到月末
    // chrono month arithmetic clamps to the end of the month
    assert_eq!(
      rec.next_fire_after(start, start, None, None),
      Some(at(2025, 2, 28, 9, 0, 0))
    );
  }

  #[test]
  fn test_daily_time_interval() {
    let rec = Recurrence::DailyTimeInterval {
      start_second_of_day: 9 * 3600,
      end_second_of_day: 10 * 3600,
      interval_seconds: 1800,
      days_of_week: vec![0, 1, 2, 3, 4],
    };
    let start = at(2025, 6, 6, 0, 0, 0); // Friday
    assert_eq!(
      rec.first_fire_time(start, None, None),
      Some(at(2025, 6, 6, 9, 0, 0))
    );
    // 周五 09:30 之后是周五 10:00 前的最后一个槽位……实际是 09:30 槽位之后的下一天槽位
    // After Friday 09:30 the window is exhausted at 10:00, so the next fire
    // skips the weekend onto Monday
    assert_eq!(
      rec.next_fire_after(at(2025, 6, 6, 9, 30, 0), start, None, None),
      Some(at(2025, 6, 9, 9, 0, 0))
    );
  }

  #[test]
  fn test_misfire_recompute_with_calendar() {
    let rec = Recurrence::simple(Duration::from_secs(3600), REPEAT_INDEFINITELY);
    let start = at(2025, 6, 6, 12, 0, 0); // Friday noon
    let cal = Calendar::Weekly {
      description: None,
      excluded_days: vec![5, 6],
    };
    // 周六中午 misfire，周末被排除，按小时格点落到周一 00:00
    // Misfired on Saturday noon with weekends excluded, the hourly grid lands
    // on Monday 00:00
    let next = rec
      .update_after_misfire(at(2025, 6, 7, 12, 0, 0), start, None, Some(&cal))
      .unwrap();
    assert_eq!(next, at(2025, 6, 9, 0, 0, 0));
  }

  #[test]
  fn test_serde_tagged_round_trip() {
    let rec = Recurrence::cron("0 0 * * * *");
    let json = serde_json::to_value(&rec).unwrap();
    assert_eq!(json["kind"], "cron");
    let back: Recurrence = serde_json::from_value(json).unwrap();
    assert_eq!(back, rec);
  }
}
