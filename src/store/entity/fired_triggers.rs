//! 已点火触发器实体
//! Fired trigger entity

use sea_orm::entity::prelude::*;

/// 已点火触发器实体模型
/// Fired trigger entity model
///
/// 在触发器交给工作池时创建，在完成上报时删除；用于持有者崩溃后的恢复。
/// Created when a trigger is handed to a worker, deleted when completion is
/// reported; used to recover after the owner crashes.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_fired_triggers")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub fired_instance_id: String,
  /// 物理持有者的实例标识
  /// Instance id of the physical owner
  pub instance_id: String,
  pub trigger_group: String,
  pub trigger_name: String,
  pub job_group: String,
  pub job_name: String,
  pub fired_at: i64,
  pub scheduled_fire_time: i64,
  pub priority: i32,
  pub requests_recovery: bool,
  pub concurrent_execution_disallowed: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
