//! 连接状态管理
//!
//! 实时客户端对传输层健康状况的视图：
//! - 是否已连接、当前 socket id
//! - 自动重连次数（仅在 false→true 时归零）
//! - 状态机位置（Disconnected / Connecting / Connected / Exhausted）

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 未连接（初始状态，或断开后等待重连）
    Disconnected,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 重连次数耗尽，等待应用手动 connect()
    Exhausted,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "未连接"),
            ConnectionStatus::Connecting => write!(f, "连接中"),
            ConnectionStatus::Connected => write!(f, "已连接"),
            ConnectionStatus::Exhausted => write!(f, "重连已耗尽"),
        }
    }
}

/// 连接状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// 是否已连接
    pub connected: bool,
    /// 自动重连次数
    pub reconnect_attempts: u32,
    /// 服务端分配的连接标识
    pub socket_id: Option<String>,
    /// 状态机位置
    pub status: ConnectionStatus,
    /// 连接建立时间（UTC毫秒时间戳）
    pub connected_at: Option<i64>,
    /// 最近一次断开原因
    pub last_disconnect_reason: Option<String>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            connected: false,
            reconnect_attempts: 0,
            socket_id: None,
            status: ConnectionStatus::Disconnected,
            connected_at: None,
            last_disconnect_reason: None,
        }
    }

    /// 获取连接持续时间（秒）
    pub fn connection_duration_secs(&self) -> Option<i64> {
        self.connected_at.map(|connected_at| {
            let now = Utc::now().timestamp_millis();
            (now - connected_at) / 1000
        })
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        format!(
            "状态: {}, socket: {}, 重连次数: {}, 已连接: {}s",
            self.status,
            self.socket_id.as_deref().unwrap_or("-"),
            self.reconnect_attempts,
            self.connection_duration_secs().unwrap_or(0)
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// 连接状态管理器（线程安全）
///
/// 只有实时客户端内部的传输事件处理函数会修改它。
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateManager {
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记开始连接
    pub fn mark_connecting(&self) {
        let mut state = self.state.write();
        if !state.connected {
            state.status = ConnectionStatus::Connecting;
        }
    }

    /// 标记连接成功，重连次数归零
    pub fn mark_connected(&self, socket_id: String) {
        let mut state = self.state.write();
        state.connected = true;
        state.reconnect_attempts = 0;
        state.socket_id = Some(socket_id);
        state.status = ConnectionStatus::Connected;
        state.connected_at = Some(Utc::now().timestamp_millis());
    }

    /// 标记断开连接
    pub fn mark_disconnected(&self, reason: Option<String>) {
        let mut state = self.state.write();
        state.connected = false;
        state.socket_id = None;
        state.connected_at = None;
        state.status = ConnectionStatus::Disconnected;
        if reason.is_some() {
            state.last_disconnect_reason = reason;
        }
    }

    /// 标记重连耗尽
    pub fn mark_exhausted(&self) {
        let mut state = self.state.write();
        state.connected = false;
        state.status = ConnectionStatus::Exhausted;
    }

    /// 更新服务端下发的 socket id
    pub fn set_socket_id(&self, socket_id: String) {
        self.state.write().socket_id = Some(socket_id);
    }

    /// 重连次数 +1，返回新的次数
    pub fn increment_attempts(&self) -> u32 {
        let mut state = self.state.write();
        state.reconnect_attempts += 1;
        state.reconnect_attempts
    }

    /// 重置重连次数
    ///
    /// 除连接成功外，还有两处会归零：手动 connect() 离开 Exhausted，
    /// 以及本端主动 disconnect()。主动断开结束整个连接会话，之后的 connect()
    /// 从第 1 次重连重新计数。
    pub fn reset_attempts(&self) {
        let mut state = self.state.write();
        state.reconnect_attempts = 0;
        if state.status == ConnectionStatus::Exhausted {
            state.status = ConnectionStatus::Disconnected;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.read().reconnect_attempts
    }

    /// 获取当前状态快照
    pub fn snapshot(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// 打印状态到日志
    pub fn log_state(&self) {
        tracing::info!("【连接状态】{}", self.state.read().summary());
    }
}
