//! 集成测试公共设施
//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use quartz_store::{JobStore, SchedulerSignaler, StoreConfig, Trigger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// 安装测试日志订阅器；过滤器由 RUST_LOG 控制
/// Install the test log subscriber; the filter is controlled by RUST_LOG
pub fn init_tracing() {
  TRACING.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

/// 在临时目录中的 SQLite 文件上构建一个存储实例
/// Build a store instance over a SQLite file in a temp directory
pub async fn store_at(dir: &TempDir, instance_id: &str, instance_name: &str) -> JobStore {
  store_with_config(base_config(dir, instance_id, instance_name)).await
}

/// 测试用的基础配置：短轮询、短重试
/// Base test configuration: short polling, short retries
pub fn base_config(dir: &TempDir, instance_id: &str, instance_name: &str) -> StoreConfig {
  init_tracing();
  let path = dir.path().join("quartz.db");
  let url = format!("sqlite://{}?mode=rwc", path.display());
  StoreConfig::new(url, instance_id, instance_name)
    .lock_poll_interval(Duration::from_millis(25))
    .retry(3, Duration::from_millis(10))
}

/// 按给定配置构建存储实例
/// Build a store instance from the given configuration
pub async fn store_with_config(config: StoreConfig) -> JobStore {
  JobStore::initialize_silent(config)
    .await
    .expect("store initialization failed")
}

/// 记录通知次数的信号接收器
/// Signal sink that counts notifications
#[derive(Debug, Default)]
pub struct CountingSignaler {
  pub misfired: AtomicUsize,
  pub finalized: AtomicUsize,
}

#[async_trait]
impl SchedulerSignaler for CountingSignaler {
  async fn notify_trigger_misfired(&self, _trigger: &Trigger) {
    self.misfired.fetch_add(1, Ordering::SeqCst);
  }

  async fn notify_trigger_finalized(&self, _trigger: &Trigger) {
    self.finalized.fetch_add(1, Ordering::SeqCst);
  }
}

/// 按配置构建带计数信号接收器的存储实例
/// Build a store instance with a counting signal sink
pub async fn store_with_signaler(
  config: StoreConfig,
) -> (JobStore, Arc<CountingSignaler>) {
  let signaler = Arc::new(CountingSignaler::default());
  let store = JobStore::initialize(config, signaler.clone())
    .await
    .expect("store initialization failed");
  (store, signaler)
}
