//! 分布式互斥锁模块
//! Distributed mutex module
//!
//! 提供命名的、不可重入的集群级互斥：获取是单次往返的条件 upsert，
//! Provides named, non-reentrant, cluster-wide mutual exclusion: acquisition
//! is a single-round-trip conditional upsert,
//! 行缺失或已过期时成功；持有者崩溃后锁在一个 TTL 周期内被接管。
//! succeeding when the row is absent or expired; a crashed holder's lock is
//! taken over within one TTL period.

use crate::error::{Error, Result};
use crate::store::entity::locks;
use crate::store::StoreConn;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityName, EntityTrait, QueryFilter};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 锁的名称；集群中只存在这两把锁
/// Lock names; only these two locks exist in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
  /// 覆盖触发器、作业、日历、暂停组与已点火记录的全部变更
  /// Covers all mutations of triggers, jobs, calendars, paused groups and
  /// fired-trigger records
  TriggerAccess,
  /// 保留给调度器状态更新
  /// Reserved for scheduler-state updates
  StateAccess,
}

impl LockType {
  /// 转换为存储用字符串
  /// Convert to the stored string form
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::TriggerAccess => "trigger_access",
      Self::StateAccess => "state_access",
    }
  }
}

impl fmt::Display for LockType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 锁管理器
/// Lock manager
///
/// 真正的互斥体存在数据库里；本对象只保存进程内的持有表，
/// The actual mutex lives in the database; this object only keeps the
/// in-process held table,
/// 生命周期归属于拥有它的存储实例，没有进程级单例。
/// owned by the enclosing store instance with explicit lifetime, no
/// process-wide singleton.
pub struct LockManager {
  conn: StoreConn,
  instance_name: String,
  instance_id: String,
  ttl: Duration,
  poll_interval: Duration,
  held: tokio::sync::Mutex<HashSet<LockType>>,
}

impl LockManager {
  /// 创建新的锁管理器
  /// Create a new lock manager
  pub fn new(
    conn: StoreConn,
    instance_name: String,
    instance_id: String,
    ttl: Duration,
    poll_interval: Duration,
  ) -> Self {
    Self {
      conn,
      instance_name,
      instance_id,
      ttl,
      poll_interval,
      held: tokio::sync::Mutex::new(HashSet::new()),
    }
  }

  /// 获取锁；失败时以固定间隔轮询，直到成功或被取消
  /// Acquire the lock; on failure poll at a fixed interval until success or
  /// cancellation
  pub async fn acquire(&self, lock: LockType, token: &CancellationToken) -> Result<()> {
    // 进程内持有者先于数据库裁决：同进程的竞争者在这里阻塞
    // In-process holders are adjudicated before the database: contenders from
    // the same process block here
    loop {
      if token.is_cancelled() {
        return Err(Error::Cancelled);
      }
      {
        let mut held = self.held.lock().await;
        if !held.contains(&lock) {
          held.insert(lock);
          break;
        }
      }
      tokio::select! {
        _ = token.cancelled() => return Err(Error::Cancelled),
        _ = tokio::time::sleep(self.poll_interval) => {}
      }
    }

    loop {
      match self.try_acquire(lock, token).await {
        Ok(true) => {
          tracing::debug!(lock = %lock, instance_id = %self.instance_id, "lock acquired");
          return Ok(());
        }
        Ok(false) => {
          tokio::select! {
            _ = token.cancelled() => {
              self.forget(lock).await;
              return Err(Error::Cancelled);
            }
            _ = tokio::time::sleep(self.poll_interval) => {}
          }
        }
        Err(e) => {
          self.forget(lock).await;
          return Err(e);
        }
      }
    }
  }

  /// 释放锁
  /// Release the lock
  ///
  /// 条件删除：仅持有者的行会被删除；行已被 TTL 回收或被接管时为空操作。
  /// Conditional delete: only the holder's row is removed; a no-op when the
  /// row was TTL-reaped or taken over.
  /// 释放在取消时也必须完成，因此不消费调用方的取消令牌。
  /// Release must complete even under cancellation, so it does not consume the
  /// caller's token.
  pub async fn release(&self, lock: LockType) -> Result<()> {
    let release_token = CancellationToken::new();
    let result = self
      .conn
      .retry()
      .run(&release_token, "release_lock", || async {
        let deleted = locks::Entity::delete_many()
          .filter(locks::Column::InstanceName.eq(self.instance_name.as_str()))
          .filter(locks::Column::LockType.eq(lock.as_str()))
          .filter(locks::Column::InstanceId.eq(self.instance_id.as_str()))
          .exec(self.conn.db())
          .await
          .map_err(Error::Persistence)?;
        Ok(deleted.rows_affected)
      })
      .await;
    self.forget(lock).await;
    match result {
      Ok(0) => {
        tracing::debug!(lock = %lock, "lock row already gone on release");
        Ok(())
      }
      Ok(_) => Ok(()),
      Err(e) => Err(e),
    }
  }

  /// 单次原子获取尝试
  /// One atomic acquisition attempt
  ///
  /// 条件为"行缺失或 expire_at 已过"的单文档 upsert；受影响行数为 1 即获取成功。
  /// A single-row upsert conditioned on "row absent OR expire_at elapsed"; one
  /// affected row means the claim succeeded.
  async fn try_acquire(&self, lock: LockType, token: &CancellationToken) -> Result<bool> {
    self
      .conn
      .retry()
      .run(token, "acquire_lock", || async {
        let now = Utc::now().timestamp_millis();
        let expire_at = now + self.ttl.as_millis() as i64;
        let mut insert = Query::insert();
        insert
          .into_table(locks::Entity.table_ref())
          .columns([
            locks::Column::InstanceName,
            locks::Column::LockType,
            locks::Column::InstanceId,
            locks::Column::AcquiredAt,
            locks::Column::ExpireAt,
          ])
          .values_panic([
            self.instance_name.clone().into(),
            lock.as_str().into(),
            self.instance_id.clone().into(),
            now.into(),
            expire_at.into(),
          ])
          .on_conflict(
            OnConflict::columns([locks::Column::InstanceName, locks::Column::LockType])
              .update_columns([
                locks::Column::InstanceId,
                locks::Column::AcquiredAt,
                locks::Column::ExpireAt,
              ])
              .action_and_where(Expr::col(locks::Column::ExpireAt).lt(now))
              .to_owned(),
          );
        let backend = self.conn.db().get_database_backend();
        let result = self
          .conn
          .db()
          .execute(backend.build(&insert))
          .await
          .map_err(Error::Persistence)?;
        Ok(result.rows_affected() == 1)
      })
      .await
  }

  /// 从进程内持有表移除
  /// Remove from the in-process held table
  async fn forget(&self, lock: LockType) {
    self.held.lock().await.remove(&lock);
  }
}

impl fmt::Debug for LockManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LockManager")
      .field("instance_name", &self.instance_name)
      .field("instance_id", &self.instance_id)
      .field("ttl", &self.ttl)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lock_type_strings() {
    assert_eq!(LockType::TriggerAccess.as_str(), "trigger_access");
    assert_eq!(LockType::StateAccess.as_str(), "state_access");
    assert_eq!(LockType::TriggerAccess.to_string(), "trigger_access");
  }
}
