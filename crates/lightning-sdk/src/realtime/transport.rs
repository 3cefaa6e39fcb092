//! 传输层抽象
//!
//! 实时客户端只依赖 [`Transport`]：打开一条连接、发送 JSON 事件、关闭。
//! 连接建立后，传输层把服务端推送、断开与错误通过 [`TransportEventSink`]
//! 回送给客户端。每次 open 都带一个 epoch，客户端据此丢弃旧连接的迟到事件。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// 断开原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// 服务端主动断开，不自动重连
    ServerInitiated,
    /// 连接被关闭（网络中断、对端消失）
    TransportClose,
    /// 读写出错
    TransportError,
    /// 心跳超时
    PingTimeout,
    /// 本端主动断开
    ClientInitiated,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerInitiated => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::ClientInitiated => "io client disconnect",
        }
    }

    /// 由原因字符串解析，未知原因按连接关闭处理
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "io server disconnect" => DisconnectReason::ServerInitiated,
            "transport error" => DisconnectReason::TransportError,
            "ping timeout" => DisconnectReason::PingTimeout,
            "io client disconnect" => DisconnectReason::ClientInitiated,
            _ => DisconnectReason::TransportClose,
        }
    }

    /// 是否需要应用手动 connect() 才能恢复
    pub fn is_terminal(&self) -> bool {
        matches!(self, DisconnectReason::ServerInitiated | DisconnectReason::ClientInitiated)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输层回送给客户端的事件
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// 连接断开
    Disconnect { reason: DisconnectReason },
    /// 服务端推送
    Message { event: String, data: Value },
    /// 非致命错误
    Error { message: String },
}

/// 绑定到某次连接的事件出口
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// 投递事件；客户端已销毁时返回 false
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// 双向传输
#[async_trait]
pub trait Transport: Send + Sync {
    /// 建立连接，成功时返回连接标识
    ///
    /// 同一时刻只有一条活动连接；再次 open 前实现方应先释放旧连接。
    async fn open(&self, auth_token: Option<String>, events: TransportEventSink) -> Result<String>;

    /// 发送一个事件
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// 关闭当前连接（幂等）
    async fn close(&self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_parsing() {
        assert_eq!(
            DisconnectReason::from_reason("io server disconnect"),
            DisconnectReason::ServerInitiated
        );
        assert_eq!(DisconnectReason::from_reason("whatever"), DisconnectReason::TransportClose);
        assert!(DisconnectReason::ServerInitiated.is_terminal());
        assert!(!DisconnectReason::PingTimeout.is_terminal());
    }

    #[tokio::test]
    async fn test_sink_tags_events_with_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new(7, tx);
        assert!(sink.send(TransportEvent::Error { message: "x".into() }));

        let (epoch, event) = rx.recv().await.unwrap();
        assert_eq!(epoch, 7);
        assert_eq!(event, TransportEvent::Error { message: "x".into() });

        drop(rx);
        assert!(!sink.send(TransportEvent::Error { message: "y".into() }));
    }
}
