//! 调度器注册实体
//! Scheduler registration entity

use sea_orm::entity::prelude::*;

/// 调度器注册实体模型
/// Scheduler registration entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_schedulers")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_id: String,
  /// started / running / paused / resumed
  pub state: String,
  pub last_check_in: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
