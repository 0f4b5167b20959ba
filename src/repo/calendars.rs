//! 日历仓库
//! Calendar repository

use crate::calendar::Calendar;
use crate::error::{Error, Result};
use crate::store::entity::calendars;
use crate::store::StoreConn;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set};
use tokio_util::sync::CancellationToken;

/// 日历仓库
/// Calendar repository
#[derive(Debug, Clone)]
pub struct CalendarRepository {
  conn: StoreConn,
  instance_name: String,
}

impl CalendarRepository {
  /// 创建新的日历仓库
  /// Create a new calendar repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  /// 日历是否存在
  /// Whether the calendar exists
  pub async fn exists(&self, name: &str, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "calendar_exists", || async {
        let count = calendars::Entity::find_by_id((self.instance_name.clone(), name.to_string()))
          .count(self.conn.db())
          .await?;
        Ok(count > 0)
      })
      .await
  }

  /// 按名称读取日历
  /// Get a calendar by name
  pub async fn get(&self, name: &str, token: &CancellationToken) -> Result<Option<Calendar>> {
    self
      .conn
      .retry()
      .run(token, "calendar_get", || async {
        let model = calendars::Entity::find_by_id((self.instance_name.clone(), name.to_string()))
          .one(self.conn.db())
          .await?;
        match model {
          Some(m) => Ok(Some(serde_json::from_value(m.calendar)?)),
          None => Ok(None),
        }
      })
      .await
  }

  /// 保存日历；`replace = false` 时与既有日历冲突返回 `AlreadyExists`
  /// Save a calendar; with `replace = false` a conflict with an existing
  /// calendar returns `AlreadyExists`
  pub async fn save(
    &self,
    name: &str,
    calendar: &Calendar,
    replace: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    let result = self
      .conn
      .retry()
      .run(token, "calendar_save", || async {
        let model = calendars::ActiveModel {
          instance_name: Set(self.instance_name.clone()),
          name: Set(name.to_string()),
          calendar: Set(serde_json::to_value(calendar)?),
        };
        let mut insert = calendars::Entity::insert(model);
        if replace {
          insert = insert.on_conflict(
            OnConflict::columns([calendars::Column::InstanceName, calendars::Column::Name])
              .update_column(calendars::Column::Calendar)
              .to_owned(),
          );
        }
        insert.exec_without_returning(self.conn.db()).await?;
        Ok(())
      })
      .await;
    match result {
      Err(ref e) if e.is_unique_violation() => {
        Err(Error::already_exists(format!("calendar {name}")))
      }
      other => other,
    }
  }

  /// 删除日历；返回是否有行被删除
  /// Delete a calendar; returns whether a row was removed
  pub async fn delete(&self, name: &str, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "calendar_delete", || async {
        let deleted =
          calendars::Entity::delete_by_id((self.instance_name.clone(), name.to_string()))
            .exec(self.conn.db())
            .await?;
        Ok(deleted.rows_affected > 0)
      })
      .await
  }

  /// 所有日历名称
  /// All calendar names
  pub async fn names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self
      .conn
      .retry()
      .run(token, "calendar_names", || async {
        let rows: Vec<String> = calendars::Entity::find()
          .filter(calendars::Column::InstanceName.eq(self.instance_name.as_str()))
          .select_only()
          .column(calendars::Column::Name)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows)
      })
      .await
  }

  /// 日历总数
  /// Total number of calendars
  pub async fn count(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "calendar_count", || async {
        let count = calendars::Entity::find()
          .filter(calendars::Column::InstanceName.eq(self.instance_name.as_str()))
          .count(self.conn.db())
          .await?;
        Ok(count)
      })
      .await
  }

  /// 删除该 instance_name 下的全部日历
  /// Delete every calendar under this instance_name
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "calendar_clear", || async {
        let deleted = calendars::Entity::delete_many()
          .filter(calendars::Column::InstanceName.eq(self.instance_name.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}
