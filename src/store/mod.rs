//! 存储适配器模块
//! Store adapter module
//!
//! 持有数据库连接，负责建表、建索引以及重试策略。
//! Holds the database connection and owns schema/index creation and the retry
//! policy. 生产环境面向 PostgreSQL；测试通过同一条代码路径跑在 SQLite 上。
//! Production targets PostgreSQL; tests run the same code path on SQLite.

use crate::config::StoreConfig;
use crate::error::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};

pub mod entity;
pub mod retry;

use entity::{Calendars, FiredTriggers, Jobs, Locks, PausedTriggerGroups, Schedulers, Triggers};
use retry::RetryPolicy;

/// 存储连接
/// Store connection
#[derive(Clone)]
pub struct StoreConn {
  db: DatabaseConnection,
  retry: RetryPolicy,
}

impl StoreConn {
  /// 按配置建立连接并初始化 schema
  /// Connect per the configuration and initialize the schema
  pub async fn connect(config: &StoreConfig) -> Result<Self> {
    let mut opt = ConnectOptions::new(config.effective_connection_string());
    opt.max_connections(10).sqlx_logging(false);
    let db = Database::connect(opt).await?;
    let conn = Self {
      db,
      retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay),
    };
    conn.init_schema().await?;
    Ok(conn)
  }

  /// 从现有数据库连接创建存储连接
  /// Create a store connection from an existing database connection
  pub async fn from_connection(db: DatabaseConnection, retry: RetryPolicy) -> Result<Self> {
    let conn = Self { db, retry };
    conn.init_schema().await?;
    Ok(conn)
  }

  /// 获取数据库连接
  /// Get the database connection
  pub fn db(&self) -> &DatabaseConnection {
    &self.db
  }

  /// 获取重试策略
  /// Get the retry policy
  pub fn retry(&self) -> &RetryPolicy {
    &self.retry
  }

  /// 关闭连接
  /// Close the connection
  pub async fn close(self) -> Result<()> {
    self.db.close().await?;
    Ok(())
  }

  /// 初始化数据库 schema
  /// Initialize the database schema
  ///
  /// 建表语句幂等执行；索引通过原生 SQL 创建（SeaORM 的 Schema 不含索引 API）。
  /// Table creation is executed idempotently; indexes are created with raw SQL
  /// (SeaORM's Schema has no index creation API).
  async fn init_schema(&self) -> Result<()> {
    let backend = self.db.get_database_backend();
    let schema = Schema::new(backend);

    // Create jobs table
    let mut stmt = schema.create_table_from_entity(Jobs);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create triggers table
    let mut stmt = schema.create_table_from_entity(Triggers);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create calendars table
    let mut stmt = schema.create_table_from_entity(Calendars);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create locks table
    let mut stmt = schema.create_table_from_entity(Locks);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create fired triggers table
    let mut stmt = schema.create_table_from_entity(FiredTriggers);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create paused trigger groups table
    let mut stmt = schema.create_table_from_entity(PausedTriggerGroups);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // Create schedulers table
    let mut stmt = schema.create_table_from_entity(Schedulers);
    self.db.execute(backend.build(stmt.if_not_exists())).await?;

    // 获取查询走 (instance_name, state, next_fire_time, priority) 索引
    // Acquisition queries go through the (instance_name, state,
    // next_fire_time, priority) index
    let index_sql = [
      "CREATE INDEX IF NOT EXISTS idx_quartz_triggers_acquisition ON quartz_triggers(instance_name, state, next_fire_time ASC, priority DESC)",
      "CREATE INDEX IF NOT EXISTS idx_quartz_triggers_job ON quartz_triggers(instance_name, job_group, job_name)",
      "CREATE INDEX IF NOT EXISTS idx_quartz_triggers_calendar ON quartz_triggers(instance_name, calendar_name)",
      "CREATE INDEX IF NOT EXISTS idx_quartz_locks_expire_at ON quartz_locks(expire_at)",
      "CREATE INDEX IF NOT EXISTS idx_quartz_fired_triggers_instance ON quartz_fired_triggers(instance_name, instance_id)",
    ];
    for sql in index_sql {
      self
        .db
        .execute(sea_orm::Statement::from_string(backend, sql))
        .await?;
    }

    Ok(())
  }
}

impl std::fmt::Debug for StoreConn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StoreConn")
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
