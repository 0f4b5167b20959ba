//! 后台组件模块
//! Background component module
//!
//! 提供通用的组件生命周期管理 trait
//! Provides a common trait for background component management
//!
//! 此模块定义了统一的生命周期接口，用于管理存储的后台组件（如 misfire 清扫器）
//! This module defines a unified lifecycle interface for managing the store's
//! background components (such as the misfire sweeper)

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod misfire_sweeper;

/// 组件生命周期管理接口
/// Component lifecycle management interface
///
/// 此 trait 定义了组件的基本生命周期操作：启动、关闭和状态检查
/// This trait defines the basic lifecycle operations of a component: start,
/// shutdown and state check
pub trait ComponentLifecycle {
  /// 启动组件的后台任务，返回用于等待其结束的 JoinHandle
  /// Start the component's background task, returning a JoinHandle to await
  /// its completion
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 发送关闭信号；组件完成当前一轮工作后退出
  /// Send the shutdown signal; the component exits after finishing its
  /// current round of work
  fn shutdown(&self);

  /// 组件是否已停止
  /// Whether the component has stopped
  fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct TestComponent {
    done: Arc<AtomicBool>,
  }

  impl ComponentLifecycle for TestComponent {
    fn start(self: Arc<Self>) -> JoinHandle<()> {
      tokio::spawn(async move {
        loop {
          if self.done.load(Ordering::Relaxed) {
            break;
          }
          tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
      })
    }

    fn shutdown(&self) {
      self.done.store(true, Ordering::Relaxed);
    }

    fn is_done(&self) -> bool {
      self.done.load(Ordering::Relaxed)
    }
  }

  #[tokio::test]
  async fn test_lifecycle_trait() {
    let component = Arc::new(TestComponent {
      done: Arc::new(AtomicBool::new(false)),
    });

    assert!(!component.is_done());

    let handle = component.clone().start();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    component.shutdown();

    assert!(component.is_done());
    handle.await.unwrap();
  }
}
