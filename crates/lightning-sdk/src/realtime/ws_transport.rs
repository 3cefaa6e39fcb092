//! 基于 tokio-tungstenite 的 WebSocket 传输
//!
//! 帧格式为 JSON 文本：`{"event": "<名称>", "data": <任意 JSON>}`。
//! 凭证通过 `Authorization: Bearer <token>` 请求头在握手时携带。

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::transport::{DisconnectReason, Transport, TransportEvent, TransportEventSink};
use crate::error::{LightningSDKError, Result};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// 线上帧
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub struct WsTransport {
    url: String,
    writer: Mutex<Option<WsWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 读循环：把收到的帧翻译成 [`TransportEvent`]
    async fn read_loop(
        mut reader: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        sink: TransportEventSink,
    ) {
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Envelope>(text.as_str()) {
                    Ok(envelope) => {
                        sink.send(TransportEvent::Message {
                            event: envelope.event,
                            data: envelope.data,
                        });
                    }
                    Err(e) => debug!("忽略无法解析的文本帧: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| DisconnectReason::from_reason(f.reason.as_str()))
                        .unwrap_or(DisconnectReason::TransportClose);
                    info!("🔌 服务端关闭连接: {}", reason);
                    sink.send(TransportEvent::Disconnect { reason });
                    return;
                }
                Some(Ok(Message::Binary(_))) => debug!("忽略二进制帧"),
                // Ping/Pong 由 tungstenite 在协议层处理
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket 读取失败: {}", e);
                    sink.send(TransportEvent::Error {
                        message: e.to_string(),
                    });
                    sink.send(TransportEvent::Disconnect {
                        reason: DisconnectReason::TransportError,
                    });
                    return;
                }
                None => {
                    sink.send(TransportEvent::Disconnect {
                        reason: DisconnectReason::TransportClose,
                    });
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, auth_token: Option<String>, events: TransportEventSink) -> Result<String> {
        self.close().await;

        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            LightningSDKError::Transport(format!("构建 WebSocket 请求失败: {}", e))
        })?;
        if let Ok(agent) = HeaderValue::from_str(&crate::version::user_agent()) {
            request.headers_mut().insert(USER_AGENT, agent);
        }
        if let Some(token) = auth_token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| LightningSDKError::InvalidArgument(format!("凭证包含非法字符: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request).await?;
        let (writer, reader) = stream.split();

        // 服务端的 connected 欢迎帧会覆盖这个本地标识
        let socket_id = uuid::Uuid::new_v4().to_string();
        let handle = tokio::spawn(Self::read_loop(reader, events));

        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(handle);

        info!("✅ WebSocket 已连接: {}", self.url);
        Ok(socket_id)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let frame = serde_json::to_string(&Envelope {
            event: event.to_string(),
            data: payload,
        })?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LightningSDKError::NotConnected)?;
        writer.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
            debug!("WebSocket 已关闭: {}", self.url);
        }
    }
}
