//! Lightning SDK 门面
//!
//! 应用启动时显式构造一个 [`LightningSDK`]，再把它（或其中的组件）传给需要的模块。
//! 实时客户端与离线 worker 互不共享状态，各自独立处理网络异常。

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LightningConfig;
use crate::error::{LightningSDKError, Result};
use crate::network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
use crate::offline::{
    BackgroundSync, CacheStorage, FetchRequest, Fetcher, HttpFetcher, NotificationPresenter,
    OfflineWorker, PendingSyncStore, PushHandler, RetryPolicy, SyncScheduler, SyncTag,
    TracingNotificationPresenter,
};
use crate::realtime::{CredentialStore, KvCredentialStore, RealtimeClient, Transport, WsTransport};
use crate::storage::KvStore;

/// 变更操作的投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 已实时送达
    Sent,
    /// 已写入待同步表，网络恢复后补发
    Queued,
}

/// 可替换的外部依赖
pub struct SdkComponents {
    pub transport: Arc<dyn Transport>,
    pub fetcher: Arc<dyn Fetcher>,
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub presenter: Arc<dyn NotificationPresenter>,
}

pub struct LightningSDK {
    config: LightningConfig,
    kv: KvStore,
    realtime: RealtimeClient,
    worker: OfflineWorker,
    pending: PendingSyncStore,
    scheduler: SyncScheduler,
    network: NetworkMonitor,
    push: PushHandler,
    fetcher: Arc<dyn Fetcher>,
    shutdown: AtomicBool,
}

impl LightningSDK {
    /// 使用 WebSocket 传输和 reqwest 初始化
    pub async fn initialize(config: LightningConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let components = SdkComponents {
            transport: Arc::new(WsTransport::new(config.realtime.server_url.clone())),
            fetcher: Arc::new(HttpFetcher::new(&config.http_client_config)?),
            credentials: None,
            presenter: Arc::new(TracingNotificationPresenter),
        };
        Self::initialize_with(config, components).await
    }

    /// 使用指定组件初始化
    pub async fn initialize_with(config: LightningConfig, components: SdkComponents) -> Result<Arc<Self>> {
        info!("正在初始化 LightningSDK {} ...", crate::version::SDK_VERSION);
        config.validate()?;

        // === 第1层：持久存储 ===
        let kv = KvStore::new(&config.data_dir).await?;

        // === 第2层：网络监控 ===
        let network = NetworkMonitor::new(NetworkStatus::Online);

        // === 第3层：实时客户端 ===
        let credentials: Arc<dyn CredentialStore> = match components.credentials {
            Some(credentials) => credentials,
            None => Arc::new(KvCredentialStore::new(
                kv.clone(),
                config.realtime.auth_storage_key.clone(),
            )),
        };
        let realtime = RealtimeClient::new(config.realtime.clone(), components.transport, credentials);
        realtime.init().await?;
        info!("实时客户端初始化完成");

        // === 第4层：离线 worker ===
        let caches = CacheStorage::new(kv.clone());
        let worker = OfflineWorker::new(config.offline.clone(), caches, components.fetcher.clone())?;

        // === 第5层：后台同步 ===
        let pending = PendingSyncStore::new(kv.clone());
        let sync = BackgroundSync::new(pending.clone(), components.fetcher.clone(), config.offline.clone());
        let scheduler = SyncScheduler::new(sync, RetryPolicy::new(config.sync_retry.clone()), network.clone());
        scheduler.start();
        info!("后台同步初始化完成");

        let push = PushHandler::new(config.offline.clone(), components.presenter);

        info!("✅ LightningSDK 初始化完成");
        Ok(Arc::new(Self {
            config,
            kv,
            realtime,
            worker,
            pending,
            scheduler,
            network,
            push,
            fetcher: components.fetcher,
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &LightningConfig {
        &self.config
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    pub fn offline(&self) -> &OfflineWorker {
        &self.worker
    }

    pub fn sync_scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    pub fn pending_store(&self) -> &PendingSyncStore {
        &self.pending
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn push(&self) -> &PushHandler {
        &self.push
    }

    /// 接入平台网络监听器
    pub async fn attach_network_listener(&self, listener: Arc<dyn NetworkStatusListener>) -> Result<()> {
        self.network.attach(listener).await
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(LightningSDKError::InvalidState("SDK 已关闭".to_string()));
        }
        Ok(())
    }

    /// 发送聊天消息；未连接时写入待同步表
    pub async fn send_chat_message(&self, room: &str, message: &str, metadata: Value) -> Result<Delivery> {
        self.ensure_running()?;
        if self.realtime.send_chat_message(room, message, metadata.clone()).await {
            return Ok(Delivery::Sent);
        }
        self.pending.queue_chat_message(room, message, metadata)?;
        self.scheduler.register(SyncTag::Messages);
        Ok(Delivery::Queued)
    }

    /// 提交投票；请求失败时写入待同步表
    pub async fn submit_vote(&self, event_id: &str, poll_id: &str, choice: Value) -> Result<Delivery> {
        self.ensure_running()?;
        let url = self.config.offline.resolve(&self.config.offline.vote_sync_endpoint)?;
        let body = serde_json::json!({ "eventId": event_id, "pollId": poll_id, "choice": choice });
        let request = FetchRequest::post_json(url, &body)?;

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_ok() => Ok(Delivery::Sent),
            Ok(response) if response.status < 500 && response.status != 429 => Err(LightningSDKError::Http {
                status: response.status,
                url: request.url.to_string(),
            }),
            outcome => {
                if let Err(e) = &outcome {
                    warn!("投票提交失败，稍后同步: {}", e);
                }
                self.pending.queue_vote(event_id, poll_id, choice)?;
                self.scheduler.register(SyncTag::Votes);
                Ok(Delivery::Queued)
            }
        }
    }

    /// 关闭：断开实时连接，等待后台刷新，刷盘
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 LightningSDK...");
        self.realtime.disconnect().await;
        self.worker.wait_until_idle().await;
        self.kv.flush().await?;
        info!("✅ LightningSDK 已关闭");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::fetcher::test_helpers::MockFetcher;
    use crate::offline::push::test_helpers::RecordingPresenter;
    use crate::offline::{SyncTable, WorkerState};
    use crate::realtime::transport::test_helpers::MockTransport;
    use reqwest::Method;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        sdk: Arc<LightningSDK>,
        transport: Arc<MockTransport>,
        fetcher: Arc<MockFetcher>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = LightningConfig::builder()
            .data_dir(dir.path())
            .static_assets(["/", "/offline.html"])
            .build();
        let transport = Arc::new(MockTransport::new());
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/", 200, "<html>shell</html>");
        fetcher.respond("/offline.html", 200, "<html>offline</html>");
        fetcher.respond("/api/votes", 200, "{}");
        fetcher.respond("/api/chat/messages", 201, "{}");

        let sdk = LightningSDK::initialize_with(
            config,
            SdkComponents {
                transport: transport.clone(),
                fetcher: fetcher.clone(),
                credentials: None,
                presenter: Arc::new(RecordingPresenter::default()),
            },
        )
        .await
        .unwrap();
        Harness {
            sdk,
            transport,
            fetcher,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_initialize_and_install() {
        let h = harness().await;
        h.sdk.offline().install().await.unwrap();
        assert_eq!(h.sdk.offline().state(), WorkerState::Activated);

        h.sdk.realtime().connect().await;
        assert!(h.sdk.realtime().is_connected());
        h.sdk.shutdown().await.unwrap();
        assert!(!h.sdk.realtime().is_connected());
    }

    #[tokio::test]
    async fn test_chat_message_is_queued_while_disconnected_and_flushed_later() {
        let h = harness().await;
        assert!(!h.sdk.realtime().is_connected());

        let delivery = h.sdk.send_chat_message("lobby", "hello", json!({})).await.unwrap();
        assert_eq!(delivery, Delivery::Queued);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.sdk.sync_scheduler().pending_tags().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(h.fetcher.call_count(Method::POST, "/api/chat/messages"), 1);
        assert!(h.sdk.pending_store().unsynced(SyncTable::Messages).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_is_queued_when_network_fails() {
        let h = harness().await;
        h.sdk.network().set_status(NetworkStatus::Offline);
        h.fetcher.set_offline(true);

        let delivery = h.sdk.submit_vote("e1", "p1", json!("yes")).await.unwrap();
        assert_eq!(delivery, Delivery::Queued);
        assert_eq!(h.sdk.pending_store().unsynced(SyncTable::Votes).unwrap().len(), 1);

        h.fetcher.set_offline(false);
        h.sdk.network().set_status(NetworkStatus::Online);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.sdk.pending_store().unsynced(SyncTable::Votes).unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_vote_rejected_by_server_is_not_queued() {
        let h = harness().await;
        h.fetcher.respond("/api/votes", 400, "bad");

        let result = h.sdk.submit_vote("e1", "p1", json!("yes")).await;
        assert!(matches!(result, Err(LightningSDKError::Http { status: 400, .. })));
        assert!(h.sdk.pending_store().unsynced(SyncTable::Votes).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_credential_is_persisted_in_kv() {
        let h = harness().await;
        h.sdk.realtime().update_auth(Some("secret".into())).await.unwrap();
        let stored: Option<String> = h
            .sdk
            .kv
            .get(crate::storage::AUTH_TREE, "authToken")
            .unwrap();
        assert_eq!(stored.as_deref(), Some("secret"));
        assert_eq!(h.transport.auth_tokens().last().cloned().flatten().as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_fail() {
        let h = harness().await;
        h.sdk.shutdown().await.unwrap();
        h.sdk.shutdown().await.unwrap();
        assert!(matches!(
            h.sdk.submit_vote("e1", "p1", json!(1)).await,
            Err(LightningSDKError::InvalidState(_))
        ));
    }
}
