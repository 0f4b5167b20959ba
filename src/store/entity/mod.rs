//! SeaORM 实体模块
//! SeaORM entity module
//!
//! 定义了与存储表对应的实体模型；所有复合主键都包含 instance_name
//! Defines entity models corresponding to the store tables; every composite
//! primary key includes instance_name

pub mod calendars;
pub mod fired_triggers;
pub mod jobs;
pub mod locks;
pub mod paused_trigger_groups;
pub mod prelude;
pub mod schedulers;
pub mod triggers;

pub use prelude::*;
