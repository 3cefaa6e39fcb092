//! 实时客户端
//!
//! 维护一条到推送服务的逻辑连接：
//! - 断线后按指数退避自动重连，超过上限进入 Exhausted，等待应用手动 connect()
//! - 服务端主动断开时不自动重连
//! - 每次连接成功后重放全部订阅
//! - 服务端事件翻译成 [`LocalEvent`] 后在本地事件总线上派发
//!
//! 并发模型：一个后台驱动任务串行处理传输事件和重连定时器；
//! 同一时刻最多一个连接尝试在进行，多余的 connect() 会被合并。

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectBackoff;
use super::credentials::CredentialStore;
use super::subscription::{Subscription, SubscriptionSet};
use super::transport::{DisconnectReason, Transport, TransportEvent, TransportEventSink};
use crate::config::RealtimeConfig;
use crate::connection_state::{ConnectionState, ConnectionStateManager, ConnectionStatus};
use crate::error::{LightningSDKError, Result};
use crate::events::{EventHandler, EventHub, LocalEvent};

/// 驱动任务的控制信号
#[derive(Debug)]
enum Control {
    /// 第 n 代重连定时器到期
    ReconnectDue(u64),
    /// 被取代的连接尝试结束后补一次连接
    Reconnect,
}

/// `get_connection_status()` 的返回值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusReport {
    #[serde(flatten)]
    pub state: ConnectionState,
    /// 订阅的规范序列化
    pub subscriptions: Vec<String>,
}

struct ClientInner {
    config: RealtimeConfig,
    backoff: ReconnectBackoff,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialStore>,
    state: ConnectionStateManager,
    hub: EventHub,
    subscriptions: Mutex<SubscriptionSet>,
    auth_token: RwLock<Option<String>>,
    /// 当前连接的 epoch，旧连接的事件一律丢弃
    epoch: AtomicU64,
    connecting: AtomicBool,
    /// 最近一个已结束（握手失败或已处理断开）的 epoch
    settled_epoch: Mutex<u64>,
    /// 应用希望保持连接（disconnect() 后为 false）
    wants_connection: AtomicBool,
    timer_generation: AtomicU64,
    pending_timer: Mutex<Option<u64>>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    control_tx: mpsc::UnboundedSender<Control>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// 实时客户端（可克隆，克隆共享同一连接）
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// 创建客户端并启动驱动任务（需要在 tokio 运行时内调用）
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            backoff: ReconnectBackoff::from_config(&config),
            config,
            transport,
            credentials,
            state: ConnectionStateManager::new(),
            hub: EventHub::new(),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            auth_token: RwLock::new(None),
            epoch: AtomicU64::new(0),
            connecting: AtomicBool::new(false),
            settled_epoch: Mutex::new(0),
            wants_connection: AtomicBool::new(false),
            timer_generation: AtomicU64::new(0),
            pending_timer: Mutex::new(None),
            transport_tx,
            control_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let driver = tokio::spawn(drive(Arc::downgrade(&inner), transport_rx, control_rx));
        inner.tasks.lock().push(driver);

        Self { inner }
    }

    /// 加载已保存的凭证并开始监听凭证变化
    pub async fn init(&self) -> Result<()> {
        let token = self.inner.credentials.load().await?;
        *self.inner.auth_token.write() = token;

        let mut changes = self.inner.credentials.watch();
        let weak = Arc::downgrade(&self.inner);
        let watcher = tokio::spawn(async move {
            while let Some(token) = changes.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if *inner.auth_token.read() == token {
                    continue;
                }
                info!("🔑 凭证在外部被修改，重新建立连接");
                inner.apply_auth(token).await;
            }
        });
        self.inner.tasks.lock().push(watcher);

        info!("实时客户端初始化完成: {}", self.inner.config.server_url);
        Ok(())
    }

    /// 发起连接
    ///
    /// 失败不会返回错误，而是进入重连调度。已连接或已有连接在进行时直接返回。
    /// 从 Exhausted 状态手动调用会把重连次数归零。
    pub async fn connect(&self) {
        let inner = &self.inner;
        inner.wants_connection.store(true, Ordering::SeqCst);
        inner.cancel_pending_timer();
        if inner.state.status() == ConnectionStatus::Exhausted {
            info!("从重连耗尽状态手动恢复连接");
            inner.state.reset_attempts();
        }
        inner.attempt_connect().await;
    }

    /// 断开连接，清空订阅和事件回调
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.wants_connection.store(false, Ordering::SeqCst);
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.cancel_pending_timer();
        inner.transport.close().await;

        inner.subscriptions.lock().clear();
        inner.hub.clear();
        inner
            .state
            .mark_disconnected(Some(DisconnectReason::ClientInitiated.as_str().to_string()));
        inner.state.reset_attempts();
        info!("🔌 实时客户端已断开");
    }

    /// 更新凭证：持久化后断开并用新凭证重连
    pub async fn update_auth(&self, token: Option<String>) -> Result<()> {
        *self.inner.auth_token.write() = token.clone();
        self.inner.credentials.store(token.as_deref()).await?;
        self.inner.apply_auth(token).await;
        Ok(())
    }

    /// 注册本地事件回调；重复注册同一回调返回 false
    pub fn on(&self, event: LocalEvent, handler: EventHandler) -> bool {
        self.inner.hub.on(event, handler)
    }

    /// 移除本地事件回调
    pub fn off(&self, event: LocalEvent, handler: &EventHandler) -> bool {
        self.inner.hub.off(event, handler)
    }

    /// 订阅房间；返回是否已实时发送（未连接时只记录，连接后重放）
    pub async fn subscribe_room(&self, room: &str, metadata: Value) -> bool {
        self.subscribe(Subscription::room(room, &metadata)).await
    }

    /// 退订房间
    pub async fn unsubscribe_room(&self, room: &str) -> bool {
        self.inner.subscriptions.lock().remove_room(room);
        self.inner
            .emit_if_connected("leave:room", json!({ "room": room }))
            .await
    }

    pub async fn subscribe_poll(&self, event_id: &str, poll_id: &str) -> bool {
        self.subscribe(Subscription::poll(event_id, poll_id)).await
    }

    pub async fn unsubscribe_poll(&self, event_id: &str, poll_id: &str) -> bool {
        let subscription = Subscription::poll(event_id, poll_id);
        self.inner.subscriptions.lock().remove(&subscription);
        let (event, payload) = subscription.unsubscribe_message();
        self.inner.emit_if_connected(event, payload).await
    }

    async fn subscribe(&self, subscription: Subscription) -> bool {
        let (event, payload) = subscription.subscribe_message();
        if !self.inner.subscriptions.lock().insert(subscription) {
            debug!("订阅已存在: {}", event);
        }
        if !self.inner.state.is_connected() {
            debug!("未连接，{} 将在连接建立后发送", event);
            return false;
        }
        self.inner.emit_if_connected(event, payload).await
    }

    /// 发送聊天消息
    pub async fn send_chat_message(&self, room: &str, message: &str, metadata: Value) -> bool {
        self.inner
            .emit_if_connected(
                "chat:message",
                json!({ "room": room, "message": message, "metadata": metadata }),
            )
            .await
    }

    /// 发送输入状态
    pub async fn send_typing(&self, room: &str, is_typing: bool) -> bool {
        self.inner
            .emit_if_connected("chat:typing", json!({ "room": room, "isTyping": is_typing }))
            .await
    }

    /// 发送通用消息 `{type, payload, ...options}`
    pub async fn send_message(&self, message_type: &str, payload: Value, options: Map<String, Value>) -> bool {
        let mut body = options;
        body.insert("type".to_string(), Value::String(message_type.to_string()));
        body.insert("payload".to_string(), payload);
        self.inner.emit_if_connected("message", Value::Object(body)).await
    }

    /// 连接状态与订阅快照
    pub fn get_connection_status(&self) -> ConnectionStatusReport {
        ConnectionStatusReport {
            state: self.inner.state.snapshot(),
            subscriptions: self.inner.subscriptions.lock().serialized(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.status()
    }

    /// 是否有已布置但未触发的重连定时器
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.pending_timer.lock().is_some()
    }

    /// 本地事件总线
    pub fn events(&self) -> &EventHub {
        &self.inner.hub
    }
}

impl ClientInner {
    fn cancel_pending_timer(&self) {
        if self.pending_timer.lock().take().is_some() {
            debug!("取消待触发的重连定时器");
        }
    }

    async fn attempt_connect(self: &Arc<Self>) {
        if self.state.is_connected() {
            debug!("已连接，忽略 connect()");
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("已有连接尝试在进行，合并本次 connect()");
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.mark_connecting();
        let token = self.auth_token.read().clone();
        let sink = TransportEventSink::new(epoch, self.transport_tx.clone());
        let timeout = self.config.connect_timeout();
        debug!("🔗 开始连接 #{} -> {}", epoch, self.config.server_url);

        let result = match tokio::time::timeout(timeout, self.transport.open(token, sink)).await {
            Ok(result) => result,
            Err(_) => {
                self.transport.close().await;
                Err(LightningSDKError::Timeout(format!("连接超时 ({:?})", timeout)))
            }
        };
        self.connecting.store(false, Ordering::SeqCst);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            // disconnect() 或 update_auth() 在握手期间发生
            debug!("连接尝试 #{} 已被取代", epoch);
            if result.is_ok() {
                self.transport.close().await;
            }
            if self.wants_connection.load(Ordering::SeqCst) {
                let _ = self.control_tx.send(Control::Reconnect);
            }
            return;
        }

        match result {
            Ok(socket_id) => {
                {
                    let settled = self.settled_epoch.lock();
                    if *settled == epoch {
                        // 驱动任务已处理本连接的断开并安排重连
                        warn!("连接 #{} 在握手期间已断开", epoch);
                        return;
                    }
                    self.state.mark_connected(socket_id.clone());
                }
                self.on_connected(socket_id).await;
            }
            Err(e) => {
                warn!("❌ 连接失败: {}", e);
                if !self.settle(epoch, &e.to_string()) {
                    return;
                }
                self.schedule_reconnect();
            }
        }
    }

    /// 结束某个 epoch 的连接并标记断开；已结束过则返回 false
    fn settle(&self, epoch: u64, reason: &str) -> bool {
        let mut settled = self.settled_epoch.lock();
        if *settled == epoch {
            return false;
        }
        *settled = epoch;
        self.state.mark_disconnected(Some(reason.to_string()));
        true
    }

    async fn on_connected(&self, socket_id: String) {
        info!("✅ 实时连接已建立: {}", socket_id);

        let replay: Vec<Subscription> = self.subscriptions.lock().iter().cloned().collect();
        for subscription in replay {
            let (event, payload) = subscription.subscribe_message();
            if let Err(e) = self.transport.emit(event, payload).await {
                warn!("重放订阅失败 {}: {}", event, e);
            }
        }

        self.hub.emit(LocalEvent::Connected, &json!({ "socketId": socket_id }));
    }

    /// 布置下一次重连；次数耗尽时发出 maxReconnectAttemptsReached
    fn schedule_reconnect(&self) {
        if !self.wants_connection.load(Ordering::SeqCst) {
            return;
        }

        let attempts = self.state.reconnect_attempts();
        if !self.backoff.can_retry(attempts) {
            if self.state.status() != ConnectionStatus::Exhausted {
                self.state.mark_exhausted();
                error!("重连 {} 次仍失败，停止自动重连", attempts);
                self.hub
                    .emit(LocalEvent::MaxReconnectAttemptsReached, &json!({ "attempts": attempts }));
            }
            return;
        }

        let attempt = self.state.increment_attempts();
        let delay = self.backoff.delay_for(attempt);
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.pending_timer.lock() = Some(generation);
        info!("🔄 {:?} 后进行第 {} 次重连", delay, attempt);

        let control_tx = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control_tx.send(Control::ReconnectDue(generation));
        });
    }

    async fn on_reconnect_due(self: &Arc<Self>, generation: u64) {
        {
            let mut pending = self.pending_timer.lock();
            if *pending != Some(generation) {
                debug!("忽略过期的重连定时器 #{}", generation);
                return;
            }
            *pending = None;
        }
        if self.state.is_connected() {
            debug!("连接已恢复，跳过本次重连");
            return;
        }
        self.attempt_connect().await;
    }

    async fn apply_auth(self: &Arc<Self>, token: Option<String>) {
        *self.auth_token.write() = token;
        let was_connected = self.state.is_connected();

        self.wants_connection.store(true, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_pending_timer();
        self.transport.close().await;

        let reason = DisconnectReason::ClientInitiated.as_str();
        self.state.mark_disconnected(Some(reason.to_string()));
        if was_connected {
            self.hub.emit(LocalEvent::Disconnected, &json!({ "reason": reason }));
        }
        self.attempt_connect().await;
    }

    async fn handle_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!("丢弃旧连接 #{} 的事件", epoch);
            return;
        }

        match event {
            TransportEvent::Disconnect { reason } => {
                if !self.settle(epoch, reason.as_str()) {
                    debug!("连接 #{} 的断开已处理", epoch);
                    return;
                }
                warn!("🔌 连接断开: {}", reason);
                self.hub
                    .emit(LocalEvent::Disconnected, &json!({ "reason": reason.as_str() }));
                if reason.is_terminal() {
                    info!("对端主动断开，等待手动 connect()");
                } else {
                    self.schedule_reconnect();
                }
            }
            TransportEvent::Message { event, data } => self.handle_server_event(&event, data),
            TransportEvent::Error { message } => {
                warn!("传输层错误: {}", message);
                self.hub.emit(LocalEvent::Error, &json!({ "message": message }));
            }
        }
    }

    fn handle_server_event(&self, event: &str, data: Value) {
        if event == "connected" {
            if let Some(socket_id) = data.get("socketId").and_then(Value::as_str) {
                self.state.set_socket_id(socket_id.to_string());
            }
            debug!("收到服务端欢迎消息");
            return;
        }

        match LocalEvent::from_server_event(event) {
            Some(local) => {
                if local == LocalEvent::ServerShutdown {
                    warn!("服务端即将关闭");
                }
                self.hub.emit(local, &data);
            }
            None => debug!("未处理的服务端事件: {}", event),
        }
    }

    async fn emit_if_connected(&self, event: &str, payload: Value) -> bool {
        if !self.state.is_connected() {
            warn!("未连接，丢弃 {}", event);
            return false;
        }
        match self.transport.emit(event, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("发送 {} 失败: {}", event, e);
                false
            }
        }
    }
}

/// 驱动任务：串行处理传输事件与定时器
async fn drive(
    inner: Weak<ClientInner>,
    mut transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        tokio::select! {
            Some((epoch, event)) = transport_rx.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.handle_transport_event(epoch, event).await;
            }
            Some(control) = control_rx.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                match control {
                    Control::ReconnectDue(generation) => inner.on_reconnect_due(generation).await,
                    Control::Reconnect => inner.attempt_connect().await,
                }
            }
            else => break,
        }
    }
    debug!("实时客户端驱动任务退出");
}
