//! 已点火触发器仓库
//! Fired trigger repository

use crate::base::keys::{JobKey, TriggerKey};
use crate::error::Result;
use crate::store::entity::fired_triggers;
use crate::store::StoreConn;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use tokio_util::sync::CancellationToken;

/// 已点火触发器记录
/// Fired trigger record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
  /// 唯一点火标识：`trigger_name:trigger_group:instance_id:utc_ticks`
  /// Unique firing id: `trigger_name:trigger_group:instance_id:utc_ticks`
  pub fired_instance_id: String,
  /// 物理持有者
  /// Physical owner
  pub instance_id: String,
  pub trigger_key: TriggerKey,
  pub job_key: JobKey,
  pub fired_at: DateTime<Utc>,
  pub scheduled_fire_time: DateTime<Utc>,
  pub priority: i32,
  pub requests_recovery: bool,
  pub concurrent_execution_disallowed: bool,
}

impl FiredTrigger {
  /// 由点火上下文合成唯一标识
  /// Synthesize the unique id from the firing context
  pub fn make_id(trigger_key: &TriggerKey, instance_id: &str, fired_at: DateTime<Utc>) -> String {
    let ticks = fired_at.timestamp_nanos_opt().unwrap_or_default();
    format!(
      "{}:{}:{}:{}",
      trigger_key.name, trigger_key.group, instance_id, ticks
    )
  }
}

/// 已点火触发器仓库
/// Fired trigger repository
#[derive(Debug, Clone)]
pub struct FiredTriggerRepository {
  conn: StoreConn,
  instance_name: String,
}

impl FiredTriggerRepository {
  /// 创建新的已点火触发器仓库
  /// Create a new fired trigger repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  fn to_domain(model: fired_triggers::Model) -> FiredTrigger {
    FiredTrigger {
      fired_instance_id: model.fired_instance_id,
      instance_id: model.instance_id,
      trigger_key: TriggerKey::new(model.trigger_group, model.trigger_name),
      job_key: JobKey::new(model.job_group, model.job_name),
      fired_at: crate::base::from_millis(model.fired_at),
      scheduled_fire_time: crate::base::from_millis(model.scheduled_fire_time),
      priority: model.priority,
      requests_recovery: model.requests_recovery,
      concurrent_execution_disallowed: model.concurrent_execution_disallowed,
    }
  }

  /// 插入一条点火记录
  /// Insert one firing record
  pub async fn insert(&self, record: &FiredTrigger, token: &CancellationToken) -> Result<()> {
    self
      .conn
      .retry()
      .run(token, "fired_insert", || async {
        let model = fired_triggers::ActiveModel {
          instance_name: Set(self.instance_name.clone()),
          fired_instance_id: Set(record.fired_instance_id.clone()),
          instance_id: Set(record.instance_id.clone()),
          trigger_group: Set(record.trigger_key.group.clone()),
          trigger_name: Set(record.trigger_key.name.clone()),
          job_group: Set(record.job_key.group.clone()),
          job_name: Set(record.job_key.name.clone()),
          fired_at: Set(crate::base::to_millis(record.fired_at)),
          scheduled_fire_time: Set(crate::base::to_millis(record.scheduled_fire_time)),
          priority: Set(record.priority),
          requests_recovery: Set(record.requests_recovery),
          concurrent_execution_disallowed: Set(record.concurrent_execution_disallowed),
        };
        fired_triggers::Entity::insert(model)
          .exec_without_returning(self.conn.db())
          .await?;
        Ok(())
      })
      .await
  }

  /// 删除某触发器在某实例上的点火记录（完成上报路径）
  /// Delete the firing records of one trigger on one instance (the completion
  /// path)
  pub async fn delete_for_trigger(
    &self,
    trigger_key: &TriggerKey,
    instance_id: &str,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "fired_delete_for_trigger", || async {
        let deleted = fired_triggers::Entity::delete_many()
          .filter(fired_triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(fired_triggers::Column::TriggerGroup.eq(trigger_key.group.as_str()))
          .filter(fired_triggers::Column::TriggerName.eq(trigger_key.name.as_str()))
          .filter(fired_triggers::Column::InstanceId.eq(instance_id))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }

  /// 某实例拥有的全部点火记录
  /// Every firing record owned by one instance
  pub async fn for_instance(
    &self,
    instance_id: &str,
    token: &CancellationToken,
  ) -> Result<Vec<FiredTrigger>> {
    self
      .conn
      .retry()
      .run(token, "fired_for_instance", || async {
        let models = fired_triggers::Entity::find()
          .filter(fired_triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(fired_triggers::Column::InstanceId.eq(instance_id))
          .all(self.conn.db())
          .await?;
        Ok(models.into_iter().map(Self::to_domain).collect())
      })
      .await
  }

  /// 删除某实例拥有的全部点火记录
  /// Delete every firing record owned by one instance
  pub async fn delete_for_instance(
    &self,
    instance_id: &str,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "fired_delete_for_instance", || async {
        let deleted = fired_triggers::Entity::delete_many()
          .filter(fired_triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(fired_triggers::Column::InstanceId.eq(instance_id))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }

  /// 删除该 instance_name 下的全部点火记录
  /// Delete every firing record under this instance_name
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "fired_clear", || async {
        let deleted = fired_triggers::Entity::delete_many()
          .filter(fired_triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_make_id_format() {
    let fired_at = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap();
    let id = FiredTrigger::make_id(&TriggerKey::new("g1", "t1"), "node-1", fired_at);
    assert!(id.starts_with("t1:g1:node-1:"));
    assert_eq!(id, format!("t1:g1:node-1:{}", fired_at.timestamp_nanos_opt().unwrap()));
  }
}
