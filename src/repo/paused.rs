//! 已暂停触发器组仓库
//! Paused trigger group repository

use crate::base::constants::ALL_GROUPS_PAUSED;
use crate::error::Result;
use crate::store::entity::paused_trigger_groups;
use crate::store::StoreConn;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set};
use tokio_util::sync::CancellationToken;

/// 已暂停触发器组仓库
/// Paused trigger group repository
#[derive(Debug, Clone)]
pub struct PausedGroupRepository {
  conn: StoreConn,
  instance_name: String,
}

impl PausedGroupRepository {
  /// 创建新的已暂停组仓库
  /// Create a new paused group repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  /// 组是否在暂停集合中
  /// Whether the group is in the paused set
  pub async fn is_paused(&self, group: &str, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "paused_is_paused", || async {
        let count = paused_trigger_groups::Entity::find_by_id((
          self.instance_name.clone(),
          group.to_string(),
        ))
        .count(self.conn.db())
        .await?;
        Ok(count > 0)
      })
      .await
  }

  /// `<ALL_PAUSED>` 标记是否存在
  /// Whether the `<ALL_PAUSED>` marker is present
  pub async fn all_paused(&self, token: &CancellationToken) -> Result<bool> {
    self.is_paused(ALL_GROUPS_PAUSED, token).await
  }

  /// 把组加入暂停集合；已存在时为空操作
  /// Add the group to the paused set; a no-op when already present
  pub async fn add(&self, group: &str, token: &CancellationToken) -> Result<()> {
    self
      .conn
      .retry()
      .run(token, "paused_add", || async {
        let model = paused_trigger_groups::ActiveModel {
          instance_name: Set(self.instance_name.clone()),
          group: Set(group.to_string()),
        };
        paused_trigger_groups::Entity::insert(model)
          .on_conflict(
            OnConflict::columns([
              paused_trigger_groups::Column::InstanceName,
              paused_trigger_groups::Column::Group,
            ])
            .do_nothing()
            .to_owned(),
          )
          .exec_without_returning(self.conn.db())
          .await?;
        Ok(())
      })
      .await
  }

  /// 把组移出暂停集合；返回是否有行被删除
  /// Remove the group from the paused set; returns whether a row was removed
  pub async fn remove(&self, group: &str, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "paused_remove", || async {
        let deleted = paused_trigger_groups::Entity::delete_by_id((
          self.instance_name.clone(),
          group.to_string(),
        ))
        .exec(self.conn.db())
        .await?;
        Ok(deleted.rows_affected > 0)
      })
      .await
  }

  /// 当前暂停集合
  /// The current paused set
  pub async fn all(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self
      .conn
      .retry()
      .run(token, "paused_all", || async {
        let rows: Vec<String> = paused_trigger_groups::Entity::find()
          .filter(
            paused_trigger_groups::Column::InstanceName.eq(self.instance_name.as_str()),
          )
          .select_only()
          .column(paused_trigger_groups::Column::Group)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows)
      })
      .await
  }

  /// 清空暂停集合
  /// Clear the paused set
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "paused_clear", || async {
        let deleted = paused_trigger_groups::Entity::delete_many()
          .filter(
            paused_trigger_groups::Column::InstanceName.eq(self.instance_name.as_str()),
          )
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}
