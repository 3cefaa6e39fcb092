//! 网络可达性监控
//!
//! 后台同步在网络恢复（Offline → Online）时触发。宿主平台通过
//! [`NetworkStatusListener`] 上报状态，或直接调用 [`NetworkMonitor::set_status`]。

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

/// 网络状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkStatus {
    /// 在线
    Online,
    /// 离线
    Offline,
}

/// 网络状态变化事件
#[derive(Debug, Clone)]
pub struct NetworkStatusEvent {
    pub old_status: NetworkStatus,
    pub new_status: NetworkStatus,
    pub timestamp: i64,
}

impl NetworkStatusEvent {
    /// 是否为网络恢复
    pub fn is_recovery(&self) -> bool {
        self.old_status == NetworkStatus::Offline && self.new_status == NetworkStatus::Online
    }
}

/// 网络状态监听器（由宿主平台实现）
#[async_trait]
pub trait NetworkStatusListener: Send + Sync + std::fmt::Debug {
    /// 获取当前网络状态
    async fn get_current_status(&self) -> NetworkStatus;

    /// 开始监听网络状态变化
    async fn start_monitoring(&self) -> Result<broadcast::Receiver<NetworkStatusEvent>>;

    /// 停止监听
    async fn stop_monitoring(&self);
}

/// 网络监控管理器
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    status_sender: broadcast::Sender<NetworkStatusEvent>,
    current_status: Arc<RwLock<NetworkStatus>>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status_sender, _) = broadcast::channel(64);
        Self {
            status_sender,
            current_status: Arc::new(RwLock::new(initial)),
        }
    }

    /// 接入平台监听器，把它上报的变化转发到本监控器
    pub async fn attach(&self, listener: Arc<dyn NetworkStatusListener>) -> Result<()> {
        let initial = listener.get_current_status().await;
        self.set_status(initial);

        let mut receiver = listener.start_monitoring().await?;
        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => monitor.set_status(event.new_status),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("网络状态事件积压，跳过 {} 条", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("网络状态监听结束");
        });
        Ok(())
    }

    /// 获取当前网络状态
    pub fn get_status(&self) -> NetworkStatus {
        *self.current_status.read()
    }

    pub fn is_online(&self) -> bool {
        self.get_status() == NetworkStatus::Online
    }

    /// 设置网络状态；只有状态真正变化时才广播
    pub fn set_status(&self, new_status: NetworkStatus) {
        let old_status = {
            let mut status = self.current_status.write();
            let old = *status;
            *status = new_status;
            old
        };
        if old_status == new_status {
            return;
        }

        tracing::info!("🌐 网络状态变化: {:?} -> {:?}", old_status, new_status);
        let event = NetworkStatusEvent {
            old_status,
            new_status,
            timestamp: crate::utils::now_millis(),
        };
        let _ = self.status_sender.send(event);
    }

    /// 订阅网络状态变化
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatusEvent> {
        self.status_sender.subscribe()
    }
}


#[cfg(test)]
pub use test_helpers::DummyNetworkStatusListener;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_status_broadcasts_only_changes() {
        let monitor = NetworkMonitor::new(NetworkStatus::Offline);
        let mut rx = monitor.subscribe();

        monitor.set_status(NetworkStatus::Offline);
        monitor.set_status(NetworkStatus::Online);

        let event = rx.recv().await.unwrap();
        assert!(event.is_recovery());
        assert!(rx.try_recv().is_err());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_attach_forwards_listener_events() {
        let listener = Arc::new(DummyNetworkStatusListener::default());
        let monitor = NetworkMonitor::new(NetworkStatus::Offline);
        monitor.attach(listener.clone()).await.unwrap();
        assert!(monitor.is_online());

        let mut rx = monitor.subscribe();
        listener.switch(NetworkStatus::Offline);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.new_status, NetworkStatus::Offline);
        assert!(!monitor.is_online());
    }
}
