//! # Quartz Store
//!
//! Clustered, persistent job scheduler store in Rust
//!
//! 本库持有作业调度引擎的持久状态（作业定义、触发器、日历、实例注册、
//! This library owns the durable state of a job-scheduling engine (job
//! definitions, triggers, calendars, instance registrations,
//! 进行中的点火记录），并协调多个调度器实例，使每次计划点火在整个集群内
//! in-flight firings) and coordinates multiple scheduler instances so that
//! each scheduled fire happens
//! 至多发生一次，同时在实例崩溃后仍能存活。
//! at most once across the fleet while surviving instance crashes.
//!
//! ## 特性
//! ## Features
//!
//! - 跨集群的至多一次点火（条件状态转移）
//!   - At-most-once firing across the cluster (conditional state transitions)
//! - 带 TTL 接管的分布式互斥锁
//!   - Distributed mutexes with TTL takeover
//! - 取得 → 点火 → 完成协议与逐触发器错误上报
//!   - The acquire → fire → complete protocol with per-trigger error reporting
//! - misfire 检测、重算与后台清扫
//!   - Misfire detection, recomputation and a background sweeper
//! - 崩溃实例被中断点火的启动恢复
//!   - Startup recovery of a crashed instance's interrupted firings
//! - 组级与全局的暂停/恢复
//!   - Group-level and global pause/resume
//! - 简单间隔、cron、日历间隔与每日时间窗口四种重复规则
//!   - Simple-interval, cron, calendar-interval and daily time-window
//!     recurrences
//! - 生产面向 PostgreSQL，测试经同一代码路径跑在 SQLite 上
//!   - Production targets PostgreSQL; tests run the same code path on SQLite
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use quartz_store::{
//!   JobDetail, JobKey, JobStore, Recurrence, StoreConfig, Trigger, TriggerKey,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   // 同一 instance_name 的实例构成一个集群
//!   // Instances sharing an instance_name form one cluster
//!   let config = StoreConfig::new("postgres://localhost/quartz", "node-1", "cluster-a");
//!   let store = JobStore::initialize_silent(config).await?;
//!   let token = CancellationToken::new();
//!
//!   let job = JobDetail::new(JobKey::new("reports", "daily"), "report:generate").durable(true);
//!   let trigger = Trigger::new(
//!     TriggerKey::new("reports", "daily-at-noon"),
//!     job.key.clone(),
//!     chrono::Utc::now(),
//!     Recurrence::cron("0 0 12 * * *"),
//!   );
//!   store.store_job_and_trigger(&job, &trigger, &token).await?;
//!
//!   // 注册本实例、执行启动恢复并启动 misfire 清扫器
//!   // Register this instance, run startup recovery and launch the sweeper
//!   store.scheduler_started(&token).await?;
//!   Ok(())
//! }
//! ```

pub mod base;
pub mod calendar;
pub mod components;
pub mod config;
pub mod error;
pub mod job;
pub mod jobstore;
pub mod listener;
pub mod lock;
pub mod managers;
pub mod recurrence;
pub mod repo;
pub mod store;
pub mod trigger;

pub use base::keys::{GroupMatcher, JobKey, TriggerKey};
pub use base::state::{transition, CompletedInstruction, TriggerEvent, TriggerState};
pub use calendar::Calendar;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use job::{JobDataMap, JobDetail};
pub use jobstore::JobStore;
pub use listener::{NoopSignaler, SchedulerSignaler};
pub use lock::LockType;
pub use managers::{MisfireRecoveryResult, TriggerFiredBundle, TriggerFiredResult};
pub use recurrence::{IntervalUnit, Recurrence, REPEAT_INDEFINITELY};
pub use repo::fired::FiredTrigger;
pub use repo::schedulers::{SchedulerRegistration, SchedulerState};
pub use trigger::Trigger;
