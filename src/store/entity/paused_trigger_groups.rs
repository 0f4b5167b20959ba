//! 已暂停触发器组实体
//! Paused trigger group entity

use sea_orm::entity::prelude::*;

/// 已暂停触发器组实体模型；行的存在即表示该组被暂停
/// Paused trigger group entity model; row presence marks the group paused
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_paused_trigger_groups")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub group: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
