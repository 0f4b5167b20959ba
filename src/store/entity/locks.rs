//! 锁实体
//! Lock entity

use sea_orm::entity::prelude::*;

/// 集群互斥锁实体模型
/// Cluster mutex entity model
///
/// 行由当前持有者拥有；过期行在下一次获取时被原子接管。
/// The row is owned by the current holder; expired rows are taken over
/// atomically by the next acquisition.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quartz_locks")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub instance_name: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub lock_type: String,
  /// 持有者的实例标识
  /// Instance id of the holder
  pub instance_id: String,
  pub acquired_at: i64,
  pub expire_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
