//! 调度器注册仓库
//! Scheduler registration repository

use crate::error::Result;
use crate::store::entity::schedulers;
use crate::store::StoreConn;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// 调度器实例状态
/// Scheduler instance state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Started,
  Running,
  Paused,
  Resumed,
}

impl SchedulerState {
  /// 转换为存储用字符串
  /// Convert to the stored string form
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Started => "started",
      Self::Running => "running",
      Self::Paused => "paused",
      Self::Resumed => "resumed",
    }
  }
}

impl fmt::Display for SchedulerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SchedulerState {
  type Err = ();

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "started" => Ok(Self::Started),
      "running" => Ok(Self::Running),
      "paused" => Ok(Self::Paused),
      "resumed" => Ok(Self::Resumed),
      _ => Err(()),
    }
  }
}

/// 调度器注册信息
/// Scheduler registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerRegistration {
  pub instance_id: String,
  pub state: SchedulerState,
  pub last_check_in: DateTime<Utc>,
}

/// 调度器注册仓库
/// Scheduler registration repository
#[derive(Debug, Clone)]
pub struct SchedulerRepository {
  conn: StoreConn,
  instance_name: String,
}

impl SchedulerRepository {
  /// 创建新的调度器注册仓库
  /// Create a new scheduler registration repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  /// 写入（或刷新）一个实例的注册信息
  /// Write (or refresh) the registration of one instance
  pub async fn upsert(
    &self,
    instance_id: &str,
    state: SchedulerState,
    check_in: DateTime<Utc>,
    token: &CancellationToken,
  ) -> Result<()> {
    self
      .conn
      .retry()
      .run(token, "scheduler_upsert", || async {
        let model = schedulers::ActiveModel {
          instance_name: Set(self.instance_name.clone()),
          instance_id: Set(instance_id.to_string()),
          state: Set(state.as_str().to_string()),
          last_check_in: Set(crate::base::to_millis(check_in)),
        };
        schedulers::Entity::insert(model)
          .on_conflict(
            OnConflict::columns([
              schedulers::Column::InstanceName,
              schedulers::Column::InstanceId,
            ])
            .update_columns([schedulers::Column::State, schedulers::Column::LastCheckIn])
            .to_owned(),
          )
          .exec_without_returning(self.conn.db())
          .await?;
        Ok(())
      })
      .await
  }

  /// 仅更新状态（SchedulerPaused / SchedulerResumed 路径）
  /// Update only the state (the SchedulerPaused / SchedulerResumed path)
  pub async fn update_state(
    &self,
    instance_id: &str,
    state: SchedulerState,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "scheduler_update_state", || async {
        let updated = schedulers::Entity::update_many()
          .filter(schedulers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(schedulers::Column::InstanceId.eq(instance_id))
          .col_expr(
            schedulers::Column::State,
            sea_orm::sea_query::Expr::value(state.as_str()),
          )
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected > 0)
      })
      .await
  }

  /// 列出全部注册实例
  /// List every registered instance
  pub async fn all(&self, token: &CancellationToken) -> Result<Vec<SchedulerRegistration>> {
    self
      .conn
      .retry()
      .run(token, "scheduler_all", || async {
        let models = schedulers::Entity::find()
          .filter(schedulers::Column::InstanceName.eq(self.instance_name.as_str()))
          .all(self.conn.db())
          .await?;
        Ok(
          models
            .into_iter()
            .filter_map(|m| {
              let state = SchedulerState::from_str(&m.state).ok()?;
              Some(SchedulerRegistration {
                instance_id: m.instance_id,
                state,
                last_check_in: crate::base::from_millis(m.last_check_in),
              })
            })
            .collect(),
        )
      })
      .await
  }

  /// 删除一个实例的注册信息
  /// Delete the registration of one instance
  pub async fn delete(&self, instance_id: &str, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "scheduler_delete", || async {
        let deleted = schedulers::Entity::delete_by_id((
          self.instance_name.clone(),
          instance_id.to_string(),
        ))
        .exec(self.conn.db())
        .await?;
        Ok(deleted.rows_affected > 0)
      })
      .await
  }

  /// 删除该 instance_name 下的全部注册信息
  /// Delete every registration under this instance_name
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "scheduler_clear", || async {
        let deleted = schedulers::Entity::delete_many()
          .filter(schedulers::Column::InstanceName.eq(self.instance_name.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}
