//! 仓库模块
//! Repository module
//!
//! 每个实体一个类型化的薄门面：存在性检查、按键读取、批量查询、
//! One thin typed façade per entity: existence checks, get-by-key, bulk
//! queries,
//! 计数、插入、替换、条件状态更新与删除。所有操作都经过重试包装器。
//! counts, inserts, replaces, conditional state updates and deletes. Every
//! operation passes through the retry wrapper.

use crate::base::keys::GroupMatcher;
use sea_orm::sea_query::SimpleExpr;
use sea_orm::ColumnTrait;

pub mod calendars;
pub mod fired;
pub mod jobs;
pub mod paused;
pub mod schedulers;
pub mod triggers;

pub use calendars::CalendarRepository;
pub use fired::{FiredTrigger, FiredTriggerRepository};
pub use jobs::JobRepository;
pub use paused::PausedGroupRepository;
pub use schedulers::{SchedulerRegistration, SchedulerRepository, SchedulerState};
pub use triggers::TriggerRepository;

/// 把组匹配器编译为针对某一列的过滤表达式；`Anything` 不产生过滤
/// Compile a group matcher into a filter expression over a column; `Anything`
/// produces no filter
pub(crate) fn group_filter<C: ColumnTrait>(col: C, matcher: &GroupMatcher) -> Option<SimpleExpr> {
  if let Some(operand) = matcher.equals_operand() {
    return Some(col.eq(operand));
  }
  matcher.to_like_pattern().map(|pattern| col.like(pattern))
}
