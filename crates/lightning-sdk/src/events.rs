//! 事件系统模块 - 面向应用层的本地事件总线
//!
//! 功能包括：
//! - 传输层事件与应用回调解耦（服务端事件名 → 本地事件名）
//! - 同一事件下回调按集合语义去重
//! - 回调 panic 隔离：一个回调失败不影响其他回调，也不会传播到调用方
//! - 事件统计

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::LightningSDKError;

/// 应用层可订阅的本地事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocalEvent {
    Connected,
    Disconnected,
    ServerShutdown,
    RoomJoined,
    RoomLeft,
    RoomError,
    PollStarted,
    PollEnded,
    PollResponse,
    PollUpdate,
    PollResults,
    QuestionSubmitted,
    QuestionApproved,
    FeedbackSubmitted,
    ChatMessage,
    ChatTyping,
    Error,
    MaxReconnectAttemptsReached,
}

impl LocalEvent {
    pub const ALL: [LocalEvent; 18] = [
        LocalEvent::Connected,
        LocalEvent::Disconnected,
        LocalEvent::ServerShutdown,
        LocalEvent::RoomJoined,
        LocalEvent::RoomLeft,
        LocalEvent::RoomError,
        LocalEvent::PollStarted,
        LocalEvent::PollEnded,
        LocalEvent::PollResponse,
        LocalEvent::PollUpdate,
        LocalEvent::PollResults,
        LocalEvent::QuestionSubmitted,
        LocalEvent::QuestionApproved,
        LocalEvent::FeedbackSubmitted,
        LocalEvent::ChatMessage,
        LocalEvent::ChatTyping,
        LocalEvent::Error,
        LocalEvent::MaxReconnectAttemptsReached,
    ];

    /// 本地事件名
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalEvent::Connected => "connected",
            LocalEvent::Disconnected => "disconnected",
            LocalEvent::ServerShutdown => "serverShutdown",
            LocalEvent::RoomJoined => "roomJoined",
            LocalEvent::RoomLeft => "roomLeft",
            LocalEvent::RoomError => "roomError",
            LocalEvent::PollStarted => "pollStarted",
            LocalEvent::PollEnded => "pollEnded",
            LocalEvent::PollResponse => "pollResponse",
            LocalEvent::PollUpdate => "pollUpdate",
            LocalEvent::PollResults => "pollResults",
            LocalEvent::QuestionSubmitted => "questionSubmitted",
            LocalEvent::QuestionApproved => "questionApproved",
            LocalEvent::FeedbackSubmitted => "feedbackSubmitted",
            LocalEvent::ChatMessage => "chatMessage",
            LocalEvent::ChatTyping => "chatTyping",
            LocalEvent::Error => "error",
            LocalEvent::MaxReconnectAttemptsReached => "maxReconnectAttemptsReached",
        }
    }

    /// 服务端推送事件名 → 本地事件
    ///
    /// `connect` / `disconnect` / `connect_error` / `connected` 由客户端状态机处理，不在此映射。
    pub fn from_server_event(name: &str) -> Option<LocalEvent> {
        let event = match name {
            "server:shutdown" => LocalEvent::ServerShutdown,
            "room:joined" => LocalEvent::RoomJoined,
            "room:left" => LocalEvent::RoomLeft,
            "room:error" => LocalEvent::RoomError,
            "pollStarted" => LocalEvent::PollStarted,
            "pollEnded" => LocalEvent::PollEnded,
            "pollResponse" => LocalEvent::PollResponse,
            "pollUpdate" => LocalEvent::PollUpdate,
            "pollResults" => LocalEvent::PollResults,
            "questionSubmitted" => LocalEvent::QuestionSubmitted,
            "questionApproved" => LocalEvent::QuestionApproved,
            "feedbackSubmitted" => LocalEvent::FeedbackSubmitted,
            "chat:message" => LocalEvent::ChatMessage,
            "chat:typing" => LocalEvent::ChatTyping,
            "error" => LocalEvent::Error,
            _ => return None,
        };
        Some(event)
    }
}

impl std::fmt::Display for LocalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalEvent {
    type Err = LightningSDKError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LocalEvent::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| LightningSDKError::InvalidArgument(format!("未知事件: {}", s)))
    }
}

/// 事件回调类型
///
/// 以 `Arc` 指针作为回调身份：同一个 `Arc` 重复注册只保留一份，`off` 时按指针移除。
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// 把闭包包装为 [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &EventHandler, b: &EventHandler) -> bool {
    // 只比较数据指针，vtable 地址在不同编译单元间可能不同
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<LocalEvent, u64>,
    /// 回调 panic 次数
    pub handler_panics: u64,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 本地事件总线
#[derive(Default)]
pub struct EventHub {
    handlers: RwLock<HashMap<LocalEvent, Vec<EventHandler>>>,
    stats: RwLock<EventStats>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册回调；同一回调重复注册返回 false
    pub fn on(&self, event: LocalEvent, handler: EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let entry = handlers.entry(event).or_default();
        if entry.iter().any(|existing| same_handler(existing, &handler)) {
            debug!("回调已注册，忽略重复注册: {}", event);
            return false;
        }
        entry.push(handler);
        true
    }

    /// 移除回调；不存在时返回 false
    pub fn off(&self, event: LocalEvent, handler: &EventHandler) -> bool {
        let mut handlers = self.handlers.write();
        let Some(entry) = handlers.get_mut(&event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|existing| !same_handler(existing, handler));
        let removed = entry.len() != before;
        if entry.is_empty() {
            handlers.remove(&event);
        }
        removed
    }

    /// 同步派发事件
    ///
    /// 先复制回调列表再释放锁，回调内可以安全地调用 on/off。
    /// 返回成功执行（未 panic）的回调数量。
    pub fn emit(&self, event: LocalEvent, payload: &Value) -> usize {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&event)
            .cloned()
            .unwrap_or_default();

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event).or_insert(0) += 1;
            stats.last_event_time = Some(crate::utils::now_millis());
        }

        let mut delivered = 0;
        for (index, callback) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("❌ 事件回调 #{} 执行失败 ({}): {}", index, event, message);
                    self.stats.write().handler_panics += 1;
                }
            }
        }
        delivered
    }

    /// 某事件当前的回调数量
    pub fn handler_count(&self, event: LocalEvent) -> usize {
        self.handlers.read().get(&event).map(Vec::len).unwrap_or(0)
    }

    /// 移除所有回调
    pub fn clear(&self) {
        self.handlers.write().clear();
        debug!("Cleared all event handlers");
    }

    /// 获取事件统计
    pub fn stats(&self) -> EventStats {
        self.stats.read().clone()
    }
}
