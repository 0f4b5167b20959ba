//! 触发器仓库
//! Trigger repository
//!
//! 除普通 CRUD 外还承载两类特殊查询：按 (next_fire_time, priority) 排序的
//! Besides plain CRUD this carries the two specialty queries: the acquisition
//! query ordered by (next_fire_time, priority),
//! 获取查询，以及 misfire 清扫的计数/选择查询。所有状态写入都是
//! and the count/select queries of the misfire sweep. Every state write is a
//! 以旧状态为条件的比较交换。
//! compare-and-set conditioned on the expected old state.

use crate::base::constants::MISFIRE_INSTRUCTION_IGNORE;
use crate::base::keys::{GroupMatcher, JobKey, TriggerKey};
use crate::base::state::TriggerState;
use crate::base::{from_millis, to_millis};
use crate::error::{Error, Result};
use crate::job::JobDataMap;
use crate::store::entity::triggers;
use crate::store::StoreConn;
use crate::trigger::Trigger;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
  ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// 触发器仓库
/// Trigger repository
#[derive(Debug, Clone)]
pub struct TriggerRepository {
  conn: StoreConn,
  instance_name: String,
}

impl TriggerRepository {
  /// 创建新的触发器仓库
  /// Create a new trigger repository
  pub fn new(conn: StoreConn, instance_name: String) -> Self {
    Self { conn, instance_name }
  }

  /// 从存储行还原领域模型与状态
  /// Restore the domain model and state from a stored row
  fn to_domain(model: triggers::Model) -> Result<(Trigger, TriggerState)> {
    let state = TriggerState::from_str(&model.state)
      .map_err(|_| Error::integrity(format!("unknown trigger state {:?}", model.state)))?;
    let recurrence = serde_json::from_value(model.recurrence)?;
    let data = match model.data {
      Some(serde_json::Value::Object(map)) => map,
      _ => JobDataMap::new(),
    };
    let trigger = Trigger {
      key: TriggerKey::new(model.group, model.name),
      job_key: JobKey::new(model.job_group, model.job_name),
      description: model.description,
      next_fire_time: model.next_fire_time.map(from_millis),
      previous_fire_time: model.previous_fire_time.map(from_millis),
      priority: model.priority,
      start_time: from_millis(model.start_time),
      end_time: model.end_time.map(from_millis),
      calendar_name: model.calendar_name,
      misfire_instruction: model.misfire_instruction,
      data,
      recurrence,
    };
    Ok((trigger, state))
  }

  /// 构建存储行
  /// Build the stored row
  fn to_model(&self, trigger: &Trigger, state: TriggerState) -> Result<triggers::ActiveModel> {
    Ok(triggers::ActiveModel {
      instance_name: Set(self.instance_name.clone()),
      group: Set(trigger.key.group.clone()),
      name: Set(trigger.key.name.clone()),
      job_group: Set(trigger.job_key.group.clone()),
      job_name: Set(trigger.job_key.name.clone()),
      description: Set(trigger.description.clone()),
      next_fire_time: Set(trigger.next_fire_time.map(to_millis)),
      previous_fire_time: Set(trigger.previous_fire_time.map(to_millis)),
      priority: Set(trigger.priority),
      start_time: Set(to_millis(trigger.start_time)),
      end_time: Set(trigger.end_time.map(to_millis)),
      calendar_name: Set(trigger.calendar_name.clone()),
      misfire_instruction: Set(trigger.misfire_instruction),
      state: Set(state.as_str().to_string()),
      data: Set(if trigger.data.is_empty() {
        None
      } else {
        Some(serde_json::Value::Object(trigger.data.clone()))
      }),
      recurrence: Set(serde_json::to_value(&trigger.recurrence)?),
    })
  }

  /// 主键过滤条件
  /// Primary key filter
  fn key_filter(&self, key: &TriggerKey) -> Condition {
    Condition::all()
      .add(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
      .add(triggers::Column::Group.eq(key.group.as_str()))
      .add(triggers::Column::Name.eq(key.name.as_str()))
  }

  /// 触发器是否存在
  /// Whether the trigger exists
  pub async fn exists(&self, key: &TriggerKey, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_exists", || async {
        let count = triggers::Entity::find()
          .filter(self.key_filter(key))
          .count(self.conn.db())
          .await?;
        Ok(count > 0)
      })
      .await
  }

  /// 按键读取触发器
  /// Get a trigger by key
  pub async fn get(&self, key: &TriggerKey, token: &CancellationToken) -> Result<Option<Trigger>> {
    Ok(self.get_with_state(key, token).await?.map(|(t, _)| t))
  }

  /// 按键读取触发器及其状态
  /// Get a trigger and its state by key
  pub async fn get_with_state(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<Option<(Trigger, TriggerState)>> {
    self
      .conn
      .retry()
      .run(token, "trigger_get", || async {
        let model = triggers::Entity::find()
          .filter(self.key_filter(key))
          .one(self.conn.db())
          .await?;
        model.map(Self::to_domain).transpose()
      })
      .await
  }

  /// 触发器当前状态
  /// Current trigger state
  pub async fn get_state(
    &self,
    key: &TriggerKey,
    token: &CancellationToken,
  ) -> Result<Option<TriggerState>> {
    self
      .conn
      .retry()
      .run(token, "trigger_get_state", || async {
        let state: Option<String> = triggers::Entity::find()
          .filter(self.key_filter(key))
          .select_only()
          .column(triggers::Column::State)
          .into_tuple()
          .one(self.conn.db())
          .await?;
        match state {
          Some(s) => Ok(Some(TriggerState::from_str(&s).map_err(|_| {
            Error::integrity(format!("unknown trigger state {s:?}"))
          })?)),
          None => Ok(None),
        }
      })
      .await
  }

  /// 保存触发器；`replace = false` 时与既有触发器冲突返回 `AlreadyExists`
  /// Save a trigger; with `replace = false` a conflict with an existing
  /// trigger returns `AlreadyExists`
  pub async fn save(
    &self,
    trigger: &Trigger,
    state: TriggerState,
    replace: bool,
    token: &CancellationToken,
  ) -> Result<()> {
    let result = self
      .conn
      .retry()
      .run(token, "trigger_save", || async {
        let model = self.to_model(trigger, state)?;
        let mut insert = triggers::Entity::insert(model);
        if replace {
          insert = insert.on_conflict(
            OnConflict::columns([
              triggers::Column::InstanceName,
              triggers::Column::Group,
              triggers::Column::Name,
            ])
            .update_columns([
              triggers::Column::JobGroup,
              triggers::Column::JobName,
              triggers::Column::Description,
              triggers::Column::NextFireTime,
              triggers::Column::PreviousFireTime,
              triggers::Column::Priority,
              triggers::Column::StartTime,
              triggers::Column::EndTime,
              triggers::Column::CalendarName,
              triggers::Column::MisfireInstruction,
              triggers::Column::State,
              triggers::Column::Data,
              triggers::Column::Recurrence,
            ])
            .to_owned(),
          );
        }
        insert.exec_without_returning(self.conn.db()).await?;
        Ok(())
      })
      .await;
    match result {
      Err(ref e) if e.is_unique_violation() => {
        Err(Error::already_exists(format!("trigger {}", trigger.key)))
      }
      other => other,
    }
  }

  /// 持久化点火时间推进（next/previous/recurrence），不触碰状态
  /// Persist a fire-time advancement (next/previous/recurrence) without
  /// touching the state
  pub async fn update_fire_times(
    &self,
    trigger: &Trigger,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_update_fire_times", || async {
        let recurrence = serde_json::to_value(&trigger.recurrence)?;
        let updated = triggers::Entity::update_many()
          .filter(self.key_filter(&trigger.key))
          .col_expr(
            triggers::Column::NextFireTime,
            Expr::value(trigger.next_fire_time.map(to_millis)),
          )
          .col_expr(
            triggers::Column::PreviousFireTime,
            Expr::value(trigger.previous_fire_time.map(to_millis)),
          )
          .col_expr(triggers::Column::Recurrence, Expr::value(recurrence))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected > 0)
      })
      .await
  }

  /// 单个触发器的条件状态转移
  /// Conditional state transition of one trigger
  ///
  /// 只有当前状态在 `from` 中时才写入；返回是否赢得比较交换。
  /// Writes only when the current state is within `from`; returns whether the
  /// compare-and-set was won.
  pub async fn cas_state(
    &self,
    key: &TriggerKey,
    from: &[TriggerState],
    to: TriggerState,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_cas_state", || async {
        let updated = triggers::Entity::update_many()
          .filter(self.key_filter(key))
          .filter(triggers::Column::State.is_in(from.iter().map(|s| s.as_str())))
          .col_expr(triggers::Column::State, Expr::value(to.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected > 0)
      })
      .await
  }

  /// 整个 instance_name 范围内的条件状态转移
  /// Conditional state transition across the whole instance_name scope
  pub async fn cas_state_for_instance(
    &self,
    from: &[TriggerState],
    to: TriggerState,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_cas_state_for_instance", || async {
        let updated = triggers::Entity::update_many()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::State.is_in(from.iter().map(|s| s.as_str())))
          .col_expr(triggers::Column::State, Expr::value(to.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected)
      })
      .await
  }

  /// 按组匹配器的批量条件状态转移
  /// Bulk conditional state transition by group matcher
  pub async fn cas_state_for_groups(
    &self,
    matcher: &GroupMatcher,
    from: &[TriggerState],
    to: TriggerState,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_cas_state_for_groups", || async {
        let mut update = triggers::Entity::update_many()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::State.is_in(from.iter().map(|s| s.as_str())));
        if let Some(filter) = super::group_filter(triggers::Column::Group, matcher) {
          update = update.filter(filter);
        }
        let updated = update
          .col_expr(triggers::Column::State, Expr::value(to.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected)
      })
      .await
  }

  /// 同一作业下所有触发器的条件状态转移
  /// Conditional state transition for every trigger of one job
  pub async fn cas_state_for_job(
    &self,
    job_key: &JobKey,
    from: &[TriggerState],
    to: TriggerState,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_cas_state_for_job", || async {
        let updated = triggers::Entity::update_many()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::JobGroup.eq(job_key.group.as_str()))
          .filter(triggers::Column::JobName.eq(job_key.name.as_str()))
          .filter(triggers::Column::State.is_in(from.iter().map(|s| s.as_str())))
          .col_expr(triggers::Column::State, Expr::value(to.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(updated.rows_affected)
      })
      .await
  }

  /// 删除触发器；返回是否有行被删除
  /// Delete a trigger; returns whether a row was removed
  pub async fn delete(&self, key: &TriggerKey, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_delete", || async {
        let deleted = triggers::Entity::delete_many()
          .filter(self.key_filter(key))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected > 0)
      })
      .await
  }

  /// 删除处于给定状态的全部触发器
  /// Delete every trigger in the given state
  pub async fn delete_in_state(
    &self,
    state: TriggerState,
    token: &CancellationToken,
  ) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_delete_in_state", || async {
        let deleted = triggers::Entity::delete_many()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::State.eq(state.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }

  /// 按组匹配器列出触发器键
  /// List trigger keys by group matcher
  pub async fn keys(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<TriggerKey>> {
    self
      .conn
      .retry()
      .run(token, "trigger_keys", || async {
        let mut query = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()));
        if let Some(filter) = super::group_filter(triggers::Column::Group, matcher) {
          query = query.filter(filter);
        }
        let rows: Vec<(String, String)> = query
          .select_only()
          .column(triggers::Column::Group)
          .column(triggers::Column::Name)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows.into_iter().map(|(g, n)| TriggerKey::new(g, n)).collect())
      })
      .await
  }

  /// 引用某作业的全部触发器
  /// Every trigger referencing a job
  pub async fn for_job(&self, job_key: &JobKey, token: &CancellationToken) -> Result<Vec<Trigger>> {
    self
      .conn
      .retry()
      .run(token, "trigger_for_job", || async {
        let models = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::JobGroup.eq(job_key.group.as_str()))
          .filter(triggers::Column::JobName.eq(job_key.name.as_str()))
          .all(self.conn.db())
          .await?;
        models
          .into_iter()
          .map(|m| Self::to_domain(m).map(|(t, _)| t))
          .collect()
      })
      .await
  }

  /// 引用某作业的触发器数量
  /// Number of triggers referencing a job
  pub async fn count_for_job(&self, job_key: &JobKey, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_count_for_job", || async {
        let count = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::JobGroup.eq(job_key.group.as_str()))
          .filter(triggers::Column::JobName.eq(job_key.name.as_str()))
          .count(self.conn.db())
          .await?;
        Ok(count)
      })
      .await
  }

  /// 某作业是否有处于给定状态的触发器
  /// Whether a job has any trigger in the given state
  pub async fn job_has_trigger_in_state(
    &self,
    job_key: &JobKey,
    state: TriggerState,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_job_has_state", || async {
        let count = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::JobGroup.eq(job_key.group.as_str()))
          .filter(triggers::Column::JobName.eq(job_key.name.as_str()))
          .filter(triggers::Column::State.eq(state.as_str()))
          .count(self.conn.db())
          .await?;
        Ok(count > 0)
      })
      .await
  }

  /// 是否存在引用某日历的触发器
  /// Whether any trigger references a calendar
  pub async fn references_calendar(
    &self,
    calendar_name: &str,
    token: &CancellationToken,
  ) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "trigger_references_calendar", || async {
        let count = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::CalendarName.eq(calendar_name))
          .count(self.conn.db())
          .await?;
        Ok(count > 0)
      })
      .await
  }

  /// 引用某日历的全部触发器
  /// Every trigger referencing a calendar
  pub async fn for_calendar(
    &self,
    calendar_name: &str,
    token: &CancellationToken,
  ) -> Result<Vec<Trigger>> {
    self
      .conn
      .retry()
      .run(token, "trigger_for_calendar", || async {
        let models = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::CalendarName.eq(calendar_name))
          .all(self.conn.db())
          .await?;
        models
          .into_iter()
          .map(|m| Self::to_domain(m).map(|(t, _)| t))
          .collect()
      })
      .await
  }

  /// 所有触发器组名
  /// All trigger group names
  pub async fn group_names(&self, token: &CancellationToken) -> Result<Vec<String>> {
    self.groups(&GroupMatcher::Anything, token).await
  }

  /// 匹配的触发器组名
  /// Matching trigger group names
  pub async fn groups(
    &self,
    matcher: &GroupMatcher,
    token: &CancellationToken,
  ) -> Result<Vec<String>> {
    self
      .conn
      .retry()
      .run(token, "trigger_groups", || async {
        let mut query = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()));
        if let Some(filter) = super::group_filter(triggers::Column::Group, matcher) {
          query = query.filter(filter);
        }
        let rows: Vec<String> = query
          .select_only()
          .column(triggers::Column::Group)
          .distinct()
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows)
      })
      .await
  }

  /// 触发器总数
  /// Total number of triggers
  pub async fn count(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_count", || async {
        let count = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .count(self.conn.db())
          .await?;
        Ok(count)
      })
      .await
  }

  /// 获取查询：到期且未越过 misfire 下限的等待触发器键
  /// Acquisition query: keys of waiting triggers that are due and have not
  /// crossed the misfire floor
  ///
  /// 排序为 next_fire_time 升序、priority 降序；只投影复合键。
  /// Ordered by next_fire_time ascending then priority descending; projects
  /// the composite key only.
  pub async fn acquirable_keys(
    &self,
    no_later_than: i64,
    misfire_floor: i64,
    limit: u64,
    token: &CancellationToken,
  ) -> Result<Vec<TriggerKey>> {
    self
      .conn
      .retry()
      .run(token, "trigger_acquirable_keys", || async {
        let rows: Vec<(String, String)> = triggers::Entity::find()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(triggers::Column::State.eq(TriggerState::Waiting.as_str()))
          .filter(triggers::Column::NextFireTime.lte(no_later_than))
          .filter(
            Condition::any()
              .add(triggers::Column::MisfireInstruction.eq(MISFIRE_INSTRUCTION_IGNORE))
              .add(triggers::Column::NextFireTime.gte(misfire_floor)),
          )
          .order_by_asc(triggers::Column::NextFireTime)
          .order_by_desc(triggers::Column::Priority)
          .limit(limit)
          .select_only()
          .column(triggers::Column::Group)
          .column(triggers::Column::Name)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows.into_iter().map(|(g, n)| TriggerKey::new(g, n)).collect())
      })
      .await
  }

  /// misfire 触发器数量：等待状态、策略未被忽略、越过下限
  /// Number of misfired triggers: waiting, policy not ignored, past the floor
  pub async fn misfire_count(&self, misfire_floor: i64, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_misfire_count", || async {
        let count = triggers::Entity::find()
          .filter(self.misfire_filter(misfire_floor))
          .count(self.conn.db())
          .await?;
        Ok(count)
      })
      .await
  }

  /// 选出最多 `limit` 个 misfire 触发器键
  /// Select up to `limit` misfired trigger keys
  pub async fn misfired_keys(
    &self,
    misfire_floor: i64,
    limit: u64,
    token: &CancellationToken,
  ) -> Result<Vec<TriggerKey>> {
    self
      .conn
      .retry()
      .run(token, "trigger_misfired_keys", || async {
        let rows: Vec<(String, String)> = triggers::Entity::find()
          .filter(self.misfire_filter(misfire_floor))
          .order_by_asc(triggers::Column::NextFireTime)
          .order_by_desc(triggers::Column::Priority)
          .limit(limit)
          .select_only()
          .column(triggers::Column::Group)
          .column(triggers::Column::Name)
          .into_tuple()
          .all(self.conn.db())
          .await?;
        Ok(rows.into_iter().map(|(g, n)| TriggerKey::new(g, n)).collect())
      })
      .await
  }

  /// misfire 选择条件
  /// Misfire selection condition
  fn misfire_filter(&self, misfire_floor: i64) -> Condition {
    Condition::all()
      .add(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
      .add(triggers::Column::State.eq(TriggerState::Waiting.as_str()))
      .add(triggers::Column::MisfireInstruction.ne(MISFIRE_INSTRUCTION_IGNORE))
      .add(triggers::Column::NextFireTime.lt(misfire_floor))
  }

  /// 删除该 instance_name 下的全部触发器
  /// Delete every trigger under this instance_name
  pub async fn clear(&self, token: &CancellationToken) -> Result<u64> {
    self
      .conn
      .retry()
      .run(token, "trigger_clear", || async {
        let deleted = triggers::Entity::delete_many()
          .filter(triggers::Column::InstanceName.eq(self.instance_name.as_str()))
          .exec(self.conn.db())
          .await?;
        Ok(deleted.rows_affected)
      })
      .await
  }
}
