//! 作业实体
//! Job entity

use sea_orm::entity::prelude::*;

/// 作业实体模型
/// Job entity model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_jobs")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub group: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub name: String,
  pub description: Option<String>,
  /// 作业类型标识（由外部工作池解析）
  /// Job type identifier (resolved by the external worker pool)
  pub job_type: String,
  pub durable: bool,
  pub persist_data_after_execution: bool,
  pub concurrent_execution_disallowed: bool,
  pub requests_recovery: bool,
  #[sea_orm(nullable)]
  pub data: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
