//! 错误处理模块
//! Error handling module
//!
//! 定义了作业存储库中使用的各种错误类型
//! Defines various error types used in the job store library

use thiserror::Error;

/// 作业存储库的结果类型
/// Result type for the job store library
pub type Result<T> = std::result::Result<T, Error>;

/// 作业存储错误类型
/// Job store error type
#[derive(Error, Debug)]
pub enum Error {
  /// 实体已存在（非替换请求与已存储实体冲突）
  /// Entity already exists (a non-replace request conflicts with a stored entity)
  #[error("Already exists: {key}")]
  AlreadyExists { key: String },

  /// 引用完整性错误（缺失的作业、仍被引用的日历等）
  /// Referential integrity error (missing job, calendar still referenced, etc.)
  #[error("Integrity violation: {message}")]
  Integrity { message: String },

  /// 在重试之后仍然失败的数据库错误
  /// Database failure that survived the retry wrapper
  #[error("Persistence failure: {0}")]
  Persistence(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 取消错误
  /// Cancellation error
  #[error("Operation cancelled")]
  Cancelled,

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 未实现错误
  /// Not implemented error
  #[error("Not implemented: {0}")]
  NotImplemented(String),
}

impl Error {
  /// 创建已存在错误
  /// Create an already-exists error
  pub fn already_exists<S: Into<String>>(key: S) -> Self {
    Self::AlreadyExists { key: key.into() }
  }

  /// 创建完整性错误
  /// Create an integrity error
  pub fn integrity<S: Into<String>>(message: S) -> Self {
    Self::Integrity {
      message: message.into(),
    }
  }

  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 检查是否为瞬时错误（可重试）
  /// Check if the error is transient (retriable)
  ///
  /// 连接错误和超时会重试；重复键、校验以及其它写入错误立即向上传播
  /// Connection errors and timeouts are retried; duplicate keys, validation
  /// and other write errors propagate immediately
  pub fn is_transient(&self) -> bool {
    match self {
      Error::Persistence(db_err) => {
        // 唯一键冲突等约束错误是永久性的
        // Constraint violations such as duplicate keys are permanent
        if db_err.sql_err().is_some() {
          return false;
        }
        match db_err {
          sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => true,
          sea_orm::DbErr::Exec(e) | sea_orm::DbErr::Query(e) => {
            let msg = e.to_string().to_lowercase();
            msg.contains("timeout") || msg.contains("timed out")
          }
          _ => false,
        }
      }
      _ => false,
    }
  }

  /// 检查底层数据库错误是否为唯一键冲突
  /// Check whether the underlying database error is a unique key violation
  pub fn is_unique_violation(&self) -> bool {
    matches!(
      self,
      Error::Persistence(db_err)
        if matches!(db_err.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_)))
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_creation() {
    let err = Error::already_exists("job g.j");
    assert!(matches!(err, Error::AlreadyExists { .. }));

    let err = Error::integrity("missing job");
    assert!(matches!(err, Error::Integrity { .. }));

    let err = Error::config("instance_name must not be empty");
    assert!(matches!(err, Error::Config { .. }));
  }

  #[test]
  fn test_transient_classification() {
    let conn = Error::Persistence(sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal(
      "connection reset".into(),
    )));
    assert!(conn.is_transient());

    let timeout = Error::Persistence(sea_orm::DbErr::Exec(sea_orm::RuntimeErr::Internal(
      "statement timeout".into(),
    )));
    assert!(timeout.is_transient());

    let query = Error::Persistence(sea_orm::DbErr::Query(sea_orm::RuntimeErr::Internal(
      "syntax error".into(),
    )));
    assert!(!query.is_transient());

    assert!(!Error::Cancelled.is_transient());
    assert!(!Error::already_exists("x").is_transient());
  }
}
