//! 触发器实体
//! Trigger entity

use sea_orm::entity::prelude::*;

/// 触发器实体模型
/// Trigger entity model
///
/// 所有时间戳均为 UTC epoch 毫秒；`state` 存放状态机字符串形式。
/// All timestamps are UTC epoch milliseconds; `state` holds the string form
/// of the state machine state.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_triggers")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub group: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub name: String,
  /// 被引用作业的组
  /// Group of the referenced job
  pub job_group: String,
  /// 被引用作业的名称
  /// Name of the referenced job
  pub job_name: String,
  pub description: Option<String>,
  pub next_fire_time: Option<i64>,
  pub previous_fire_time: Option<i64>,
  pub priority: i32,
  pub start_time: i64,
  pub end_time: Option<i64>,
  pub calendar_name: Option<String>,
  pub misfire_instruction: i32,
  pub state: String,
  #[sea_orm(nullable)]
  pub data: Option<Json>,
  /// 带标签的重复规则变体
  /// Tagged recurrence variant
  pub recurrence: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
