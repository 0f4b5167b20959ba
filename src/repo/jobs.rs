//! 作业仓库
//! Job repository

use crate::base::keys::{GroupMatcher, JobKey};
use crate::error::{Error, Result};
use crate::job::{JobDataMap, JobDetail};
use crate::store::entity::jobs;
use crate::store::StoreConn;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set};
use tokio_util::sync::CancellationToken;

/// 作业仓库
/// Job repository
#[derive(Debug, Clone)]
pub struct JobRepository {
  conn: StoreConn,
  instance_name: String,
}

impl JobRepository {
  /// 创建新的作业仓库
  /// Create a new job repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  /// 从存储行还原领域模型
  /// Restore the domain model from a stored row
  fn to_domain(model: jobs::Model) -> JobDetail {
    let data = match model.data {
      Some(serde_json::Value::Object(map)) => map,
      _ => JobDataMap::new(),
    };
    JobDetail {
      key: JobKey::new(model.group, model.name),
      description: model.description,
      job_type: model.job_type,
      durable: model.durable,
      persist_data_after_execution: model.persist_data_after_execution,
      concurrent_execution_disallowed: model.concurrent_execution_disallowed,
      requests_recovery: model.requests_recovery,
      data,
    }
  }

  /// 构建存储行
  /// Build the stored row
  fn to_model(&self, job: &JobDetail) -> jobs::ActiveModel {
    jobs::ActiveModel {
      instance_name: Set(self.instance_name.clone()),
      group: Set(job.key.group.clone()),
      name: Set(job.key.name.clone()),
      description: Set(job.description.clone()),
      job_type: Set(job.job_type.clone()),
      durable: Set(job.durable),
      persist_data_after_execution: Set(job.persist_data_after_execution),
      concurrent_execution_disallowed: Set(job.concurrent_execution_disallowed),
      requests_recovery: Set(job.requests_recovery),
      data: Set(if job.data.is_empty() {
        None
      } else {
        Some(serde_json::Value::Object(job.data.clone()))
      }),
    }
  }

  /// 作业是否存在
  /// Whether the job exists
  pub async fn exists(&self, key: &JobKey, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "job_exists", || async {
        let count = jobs::Entity::find_by_id((
          self.instance_name.clone(),
          key.group.clone(),
          key.name.clone(),
        ))
        .count(self.conn.db())
        .await?;
        Ok(count > 0)
      })
      .await
  }

  /// 按键读取作业
  /// Get a job by key
  pub async fn get(&self, key: &JobKey, token: &CancellationToken) -> Result<Option<JobDetail>> {
    self
      .conn
      .retry()
      .run(token, "job_get", || async {
        let model = jobs::Entity::find_by_id((
          self.instance_name.clone(),
          key.group.clone(),
          key.name.clone(),
        ))
        .one(self.conn.db())
        .await?;
        Ok(model.map(Self::to_domain))
      })
      .await
  }

  /// 保存作业；`replace = false` 时与既有作业冲突返回 `AlreadyExists`
  /// Save a job; with `replace = false` a conflict with an existing job
  /// returns `AlreadyExists`
  pub async fn save(&self, job: &JobDetail, replace: bool, token: &CancellationToken) -> Result<()> {
    let result = self
      .conn
      .retry()
      .run(token, "job_save", || async {
        let mut insert = jobs::Entity::insert(self.to_model(job));
        if replace {
          insert = insert.on_conflict(
            OnConflict::columns([
              jobs::Column::InstanceName,
              jobs::Column::Group,
              jobs::Column::Name,
            ])
            .update_columns([
              jobs::Column::Description,
              jobs::Column::JobType,
              jobs::Column::Durable,
              jobs::Column::PersistDataAfterExecution,
              jobs::Column::ConcurrentExecutionDisallowed,
              jobs::Column::RequestsRecovery,
              jobs::Column::Data,
            ])
            .to_owned(),
          );
        }
        insert.exec_without_returning(self.conn.db()).await?;
        Ok(())
      })
      .await;
    match result {
      Err(ref e) if e.is_unique_violation() => Err(Error::already_exists(format!(
        "job {}",
        job.key
      ))),
      other => other,
    }
  }

  /// 仅更新数据映射（persist_data_after_execution 的回写路径）
  /// Update only the data map (the persist_data_after_execution write-back)
  pub async fn update_data(
    &self,
    key: &JobKey,
    data: &JobDataMap,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "job_update_data", || async {
        let value = if data.is_empty() {
          None
        } else {
          Some(serde_json::Value::Object(data.clone()))
        };
        let updated = jobs::Entity::update_many()
          .filter(jobs::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(jobs::Column::Group.eq(key.group.as_str()))
          .filter(jobs::Column::Name.eq(key.name.as_str()))
          .col_expr(jobs::Column::Data, sea_orm::sea_query::Expr::value(value))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected > 0)
      })
      .await
  }

  /// 删除作业；返回是否有行被删除
  /// Delete a job; returns whether a row was removed
  pub async fn delete(&self, key: &JobKey, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "job_delete", || async {
        let deleted = jobs::Entity::delete_by_id((
          self.instance_name.clone(),
          key.group.clone(),
          key.name.clone(),
        ))
        .exec(self.conn.db())
        .await?;
        Ok(deleted.rows_affected > 0)
      })
      .await
  }

  /// 按组匹配器列出作业键
  /// List job keys by group matcher
  pub async fn keys(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<JobKey>> {
    self
      .conn
      .retry()
      .run(token, "job_keys", || async {
        let mut query = jobs::Entity::find()
          .filter(jobs::Column::InstanceName.eq(self.instance_name.as_str()));
        if let Some(filter) = super::group_filter(jobs::Column::Group, matcher) {
          query = query.filter(filter);
        }
        let rows: Vec<(String, String)> = query
          .select_only()
          .column(jobs::Column::Group)
          .column(jobs::Column::Name)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows.into_iter().map(|(g, n)| JobKey::new(g, n)).collect())
      })
      .await
  }

  /// 所有作业组名
  /// All job group names
  pub async fn group_names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self
      .conn
      .retry()
      .run(token, "job_group_names", || async {
        let rows: Vec<String> = jobs::Entity::find()
          .filter(jobs::Column::InstanceName.eq(self.instance_name.as_str()))
          .select_only()
          .column(jobs::Column::Group)
          .distinct()
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows)
      })
      .await
  }

  /// 作业总数
  /// Total number of jobs
  pub async fn count(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "job_count", || async {
        let count = jobs::Entity::find()
          .filter(jobs::Column::InstanceName.eq(self.instance_name.as_str()))
          .count(self.conn.db())
          .await?;
        Ok(count)
      })
      .await
  }

  /// 删除该 instance_name 下的全部作业
  /// Delete every job under this instance_name
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "job_clear", || async {
        let deleted = jobs::Entity::delete_many()
          .filter(jobs::Column::InstanceName.eq(self.instance_name.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}
