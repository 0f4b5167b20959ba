//! 日历实体
//! Calendar entity

use sea_orm::entity::prelude::*;

/// 日历实体模型
/// Calendar entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_calendars")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub name: String,
  /// 序列化的排除规则
  /// Serialized exclusion ruleset
  pub calendar: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
