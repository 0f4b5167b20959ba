//! 预导入模块
//! Prelude module

pub use super::calendars::Entity as Calendars;
pub use super::fired_triggers::Entity as FiredTriggers;
pub use super::jobs::Entity as Jobs;
pub use super::locks::Entity as Locks;
pub use super::paused_trigger_groups::Entity as PausedTriggerGroups;
pub use super::schedulers::Entity as Schedulers;
pub use super::triggers::Entity as Triggers;
