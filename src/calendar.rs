//! 日历模块
//! Calendar module
//!
//! 日历是一组不透明的排除规则，用来跳过计划内的点火时刻。
//! A calendar is an opaque exclusion ruleset used to skip scheduled fires.
//! 存储层只负责持久化日历并在计算下一次点火时间时咨询它。
//! The store only persists calendars and consults them when computing next
//! fire times.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 日历排除规则
/// Calendar exclusion ruleset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calendar {
  /// 按日期排除（节假日）
  /// Excludes whole dates (holidays)
  Holiday {
    /// 描述
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// 被排除的日期
    /// Excluded dates
    excluded_dates: Vec<NaiveDate>,
  },
  /// 按星期几排除；0 = 周一 … 6 = 周日
  /// Excludes days of the week; 0 = Monday … 6 = Sunday
  Weekly {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// 被排除的星期序号
    /// Excluded weekday numbers
    excluded_days: Vec<u32>,
  },
  /// 每天排除一个时间窗口，以分钟计
  /// Excludes one time-of-day window every day, in minutes
  Daily {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    /// 窗口起点（当天第几分钟，含）
    /// Window start (minute of day, inclusive)
    start_minute_of_day: u32,
    /// 窗口终点（当天第几分钟，不含）
    /// Window end (minute of day, exclusive)
    end_minute_of_day: u32,
  },
}

impl Calendar {
  /// 判定一个时刻是否被日历包含（未被排除）
  /// Decide whether an instant is included (not excluded) by the calendar
  pub fn is_time_included(&self, t: DateTime<Utc>) -> bool {
    match self {
      Calendar::Holiday { excluded_dates, .. } => !excluded_dates.contains(&t.date_naive()),
      Calendar::Weekly { excluded_days, .. } => {
        !excluded_days.contains(&t.weekday().num_days_from_monday())
      }
      Calendar::Daily {
        start_minute_of_day,
        end_minute_of_day,
        ..
      } => {
        let minute = t.hour() * 60 + t.minute();
        minute < *start_minute_of_day || minute >= *end_minute_of_day
      }
    }
  }

  /// 日历描述
  /// Calendar description
  pub fn description(&self) -> Option<&str> {
    match self {
      Calendar::Holiday { description, .. }
      | Calendar::Weekly { description, .. }
      | Calendar::Daily { description, .. } => description.as_deref(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_holiday_calendar() {
    let cal = Calendar::Holiday {
      description: None,
      excluded_dates: vec![NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()],
    };
    let christmas = Utc.with_ymd_and_hms(2025, 12, 25, 9, 0, 0).unwrap();
    let boxing_day = Utc.with_ymd_and_hms(2025, 12, 26, 9, 0, 0).unwrap();
    assert!(!cal.is_time_included(christmas));
    assert!(cal.is_time_included(boxing_day));
  }

  #[test]
  fn test_weekly_calendar() {
    // 排除周末
    // Excludes the weekend
    let cal = Calendar::Weekly {
      description: None,
      excluded_days: vec![5, 6],
    };
    let saturday = Utc.with_ymd_and_hms(2025, 6, 7, 12, 0, 0).unwrap();
    let monday = Utc.with_ymd_and_hms(2025, 6, 9, 12, 0, 0).unwrap();
    assert!(!cal.is_time_included(saturday));
    assert!(cal.is_time_included(monday));
  }

  #[test]
  fn test_daily_calendar() {
    let cal = Calendar::Daily {
      description: None,
      start_minute_of_day: 9 * 60,
      end_minute_of_day: 17 * 60,
    };
    let in_window = Utc.with_ymd_and_hms(2025, 6, 9, 12, 30, 0).unwrap();
    let before = Utc.with_ymd_and_hms(2025, 6, 9, 8, 59, 0).unwrap();
    let after = Utc.with_ymd_and_hms(2025, 6, 9, 17, 0, 0).unwrap();
    assert!(!cal.is_time_included(in_window));
    assert!(cal.is_time_included(before));
    assert!(cal.is_time_included(after));
  }

  #[test]
  fn test_serde_round_trip() {
    let cal = Calendar::Weekly {
      description: Some("no weekends".into()),
      excluded_days: vec![5, 6],
    };
    let json = serde_json::to_value(&cal).unwrap();
    assert_eq!(json["kind"], "weekly");
    let back: Calendar = serde_json::from_value(json).unwrap();
    assert_eq!(back, cal);
  }
}
