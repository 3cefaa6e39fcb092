//! 离线 worker：安装、激活与请求拦截
//!
//! 生命周期：`Parsed → Installing → Installed → Activating → Activated`，
//! 安装失败进入 `Redundant`。激活前的所有请求直接走网络。

use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cache_storage::CacheStorage;
use super::fetcher::Fetcher;
use super::request::{cache_key_for, CachedResponse, FetchRequest};
use super::strategy::{select_strategy, CacheStrategy};
use crate::config::OfflineConfig;
use crate::error::{LightningSDKError, Result};

/// worker 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// 页面发给 worker 的控制消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    SkipWaiting,
}

/// 响应来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl FetchResponse {
    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }
}

struct WorkerInner {
    config: OfflineConfig,
    origin: Url,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<WorkerState>,
    clients_claimed: AtomicBool,
    /// 后台刷新任务
    background: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct OfflineWorker {
    inner: Arc<WorkerInner>,
}

impl OfflineWorker {
    pub fn new(config: OfflineConfig, caches: CacheStorage, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let origin = config.origin_url()?;
        Ok(Self {
            inner: Arc::new(WorkerInner {
                config,
                origin,
                caches,
                fetcher,
                state: RwLock::new(WorkerState::Parsed),
                clients_claimed: AtomicBool::new(false),
                background: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.read()
    }

    fn set_state(&self, state: WorkerState) {
        *self.inner.state.write() = state;
        debug!("worker 状态 -> {:?}", state);
    }

    /// 是否已接管页面
    pub fn clients_claimed(&self) -> bool {
        self.inner.clients_claimed.load(Ordering::SeqCst)
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.inner.caches
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.inner.config
    }

    /// 安装：预缓存全部关键资源，任何一个失败则整体失败
    pub async fn install(&self) -> Result<()> {
        match self.state() {
            WorkerState::Parsed | WorkerState::Redundant => {}
            other => {
                return Err(LightningSDKError::InvalidState(format!("当前状态 {:?} 不能安装", other)));
            }
        }
        self.set_state(WorkerState::Installing);
        info!("📦 开始预缓存 {} 个资源", self.inner.config.static_assets.len());

        let mut fetched = Vec::with_capacity(self.inner.config.static_assets.len());
        for asset in &self.inner.config.static_assets {
            match self.precache_one(asset).await {
                Ok(entry) => fetched.push(entry),
                Err(e) => {
                    error!("❌ 预缓存失败 {}: {}", asset, e);
                    self.set_state(WorkerState::Redundant);
                    return Err(e);
                }
            }
        }

        let cache = self.inner.caches.open(&self.inner.config.static_cache_name())?;
        for (key, response) in &fetched {
            cache.put_key(key, response)?;
        }
        self.set_state(WorkerState::Installed);
        info!("✅ 预缓存完成: {}", cache.name());

        if self.inner.config.skip_waiting {
            self.activate().await?;
        }
        Ok(())
    }

    async fn precache_one(&self, asset: &str) -> Result<(String, CachedResponse)> {
        let url = self.inner.config.resolve(asset)?;
        let request = FetchRequest::get(url);
        let response = self.inner.fetcher.fetch(&request).await?;
        if !response.is_ok() {
            return Err(LightningSDKError::Http {
                status: response.status,
                url: request.url.to_string(),
            });
        }
        Ok((request.cache_key(), response))
    }

    /// 激活：删除本应用其他版本的缓存分区，然后接管页面
    pub async fn activate(&self) -> Result<()> {
        match self.state() {
            WorkerState::Installed => {}
            WorkerState::Activated => return Ok(()),
            other => {
                return Err(LightningSDKError::InvalidState(format!("当前状态 {:?} 不能激活", other)));
            }
        }
        self.set_state(WorkerState::Activating);

        let current = self.inner.config.current_cache_names();
        let app_prefix = format!("{}-", self.inner.config.cache_prefix);
        for name in self.inner.caches.keys() {
            if name.starts_with(&app_prefix) && !current.contains(&name) {
                self.inner.caches.delete(&name)?;
                info!("🗑️ 删除旧缓存: {}", name);
            }
        }

        self.set_state(WorkerState::Activated);
        self.inner.clients_claimed.store(true, Ordering::SeqCst);
        info!("✅ worker 已激活并接管页面");
        Ok(())
    }

    /// 处理页面消息
    pub async fn handle_message(&self, message: WorkerMessage) -> Result<()> {
        match message {
            WorkerMessage::SkipWaiting => {
                if self.state() == WorkerState::Installed {
                    self.activate().await
                } else {
                    debug!("SKIP_WAITING 在状态 {:?} 下无效", self.state());
                    Ok(())
                }
            }
        }
    }

    /// 拦截一个请求
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let strategy = if self.state() == WorkerState::Activated {
            select_strategy(request, &self.inner.origin, &self.inner.config)
        } else {
            CacheStrategy::Passthrough
        };
        debug!("{} {} -> {:?}", request.method, request.url, strategy);

        match strategy {
            CacheStrategy::Passthrough => Ok(FetchResponse::network(self.inner.fetcher.fetch(request).await?)),
            CacheStrategy::NetworkFirst => self.network_first(request).await,
            CacheStrategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
            CacheStrategy::CacheFirst => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> Result<FetchResponse> {
        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                self.inner.remember(request, &response);
                Ok(FetchResponse::network(response))
            }
            Err(e) => match self.inner.caches.match_any(request)? {
                Some(cached) => {
                    debug!("网络失败，使用缓存: {}", request.url);
                    Ok(FetchResponse::cache(cached))
                }
                None => Err(e),
            },
        }
    }

    async fn stale_while_revalidate(&self, request: &FetchRequest) -> Result<FetchResponse> {
        if let Some(cached) = self.inner.caches.match_any(request)? {
            let inner = self.inner.clone();
            let request = request.clone();
            let handle = tokio::spawn(async move {
                match inner.fetcher.fetch(&request).await {
                    Ok(response) => inner.remember(&request, &response),
                    Err(e) => debug!("后台刷新失败 {}: {}", request.url, e),
                }
            });
            let mut background = self.inner.background.lock();
            background.retain(|task| !task.is_finished());
            background.push(handle);
            return Ok(FetchResponse::cache(cached));
        }

        let response = self.inner.fetcher.fetch(request).await?;
        self.inner.remember(request, &response);
        Ok(FetchResponse::network(response))
    }

    async fn cache_first(&self, request: &FetchRequest) -> Result<FetchResponse> {
        if let Some(cached) = self.inner.caches.match_any(request)? {
            return Ok(FetchResponse::cache(cached));
        }

        match self.inner.fetcher.fetch(request).await {
            Ok(response) => {
                self.inner.remember(request, &response);
                Ok(FetchResponse::network(response))
            }
            Err(e) if request.is_navigation() => {
                let offline_key = cache_key_for(&self.inner.config.resolve(&self.inner.config.offline_page)?);
                let cache = self.inner.caches.open(&self.inner.config.static_cache_name())?;
                match cache.match_key(&offline_key)? {
                    Some(page) => {
                        info!("📴 离线，返回兜底页面: {}", request.url);
                        Ok(FetchResponse {
                            response: page,
                            source: ResponseSource::OfflineFallback,
                        })
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// 等待所有后台刷新完成
    pub async fn wait_until_idle(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.background.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl WorkerInner {
    /// 只缓存 2xx 响应
    fn store_runtime(&self, request: &FetchRequest, response: &CachedResponse) -> Result<()> {
        if !response.is_ok() {
            return Ok(());
        }
        self.caches
            .open(&self.config.runtime_cache_name())?
            .put(request, response)
    }

    /// 写入运行时缓存；失败只记日志，不影响已取得的网络响应
    fn remember(&self, request: &FetchRequest, response: &CachedResponse) {
        if let Err(e) = self.store_runtime(request, response) {
            warn!("写入运行时缓存失败 {}: {}", request.url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::fetcher::test_helpers::MockFetcher;
    use crate::storage::KvStore;
    use reqwest::Method;

    fn test_config() -> OfflineConfig {
        OfflineConfig {
            static_assets: vec!["/".into(), "/offline.html".into(), "/css/style.css".into()],
            ..OfflineConfig::default()
        }
    }

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
    }

    fn seeded_fetcher() -> Arc<MockFetcher> {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond("/", 200, "<html>shell</html>");
        fetcher.respond("/offline.html", 200, "<html>offline</html>");
        fetcher.respond("/css/style.css", 200, "body{}");
        fetcher
    }

    async fn activated_worker(fetcher: &Arc<MockFetcher>) -> OfflineWorker {
        let caches = CacheStorage::new(KvStore::temporary().unwrap());
        let worker = OfflineWorker::new(test_config(), caches, fetcher.clone()).unwrap();
        worker.install().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
        worker
    }

    #[tokio::test]
    async fn test_install_precaches_static_assets() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;

        let static_cache = worker.caches().open("lightning-talk-static-v1").unwrap();
        assert_eq!(static_cache.len(), 3);
        assert!(worker.clients_claimed());
    }

    #[tokio::test]
    async fn test_install_failure_makes_worker_redundant() {
        let fetcher = seeded_fetcher();
        fetcher.fail_path("/css/style.css");
        let caches = CacheStorage::new(KvStore::temporary().unwrap());
        let worker = OfflineWorker::new(test_config(), caches, fetcher.clone()).unwrap();

        assert!(worker.install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Redundant);
        assert!(!worker.caches().has("lightning-talk-static-v1"));
    }

    #[tokio::test]
    async fn test_waiting_worker_passes_through_until_skip_waiting() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/api/events", 200, "[]");
        let caches = CacheStorage::new(KvStore::temporary().unwrap());
        let config = OfflineConfig {
            skip_waiting: false,
            ..test_config()
        };
        let worker = OfflineWorker::new(config, caches, fetcher.clone()).unwrap();
        worker.install().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Installed);

        worker.fetch(&FetchRequest::get(url("/api/events"))).await.unwrap();
        assert!(!worker.caches().has("lightning-talk-runtime-v1"));

        worker.handle_message(WorkerMessage::SkipWaiting).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
        assert!(worker.clients_claimed());
    }

    #[tokio::test]
    async fn test_activate_deletes_previous_versions_only() {
        let fetcher = seeded_fetcher();
        let kv = KvStore::temporary().unwrap();
        let caches = CacheStorage::new(kv);
        caches.open("lightning-talk-static-v0").unwrap();
        caches.open("lightning-talk-runtime-v0").unwrap();
        caches.open("lightning-talk-runtime-v1").unwrap();
        caches.open("other-app-cache").unwrap();

        let worker = OfflineWorker::new(test_config(), caches.clone(), fetcher.clone()).unwrap();
        worker.install().await.unwrap();

        let mut names = caches.keys();
        names.sort();
        assert_eq!(
            names,
            vec![
                "lightning-talk-runtime-v1".to_string(),
                "lightning-talk-static-v1".to_string(),
                "other-app-cache".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cached_copy() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/api/events", 200, r#"[{"id":1}]"#);
        let worker = activated_worker(&fetcher).await;

        let request = FetchRequest::get(url("/api/events"));
        let first = worker.fetch(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        let runtime = worker.caches().open("lightning-talk-runtime-v1").unwrap();
        assert_eq!(runtime.match_request(&request).unwrap().unwrap().body, first.response.body);

        fetcher.set_offline(true);
        let second = worker.fetch(&request).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response, first.response);
    }

    #[tokio::test]
    async fn test_network_first_without_cache_propagates_failure() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;
        fetcher.set_offline(true);

        let result = worker.fetch(&FetchRequest::get(url("/api/polls"))).await;
        assert!(matches!(result, Err(LightningSDKError::Transport(_))));
    }

    #[tokio::test]
    async fn test_network_first_does_not_cache_errors() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/api/broken", 500, "oops");
        let worker = activated_worker(&fetcher).await;

        let response = worker.fetch(&FetchRequest::get(url("/api/broken"))).await.unwrap();
        assert_eq!(response.response.status, 500);
        let runtime = worker.caches().open("lightning-talk-runtime-v1").unwrap();
        assert!(runtime.is_empty());
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_refreshes_in_background() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/img/speaker.png", 200, "v1");
        let worker = activated_worker(&fetcher).await;
        let request = FetchRequest::image(url("/img/speaker.png"));

        let first = worker.fetch(&request).await.unwrap();
        assert_eq!(first.source, ResponseSource::Network);
        assert_eq!(first.response.text(), "v1");

        fetcher.respond("/img/speaker.png", 200, "v2");
        let second = worker.fetch(&request).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
        assert_eq!(second.response.text(), "v1");

        worker.wait_until_idle().await;
        let runtime = worker.caches().open("lightning-talk-runtime-v1").unwrap();
        assert_eq!(runtime.match_request(&request).unwrap().unwrap().text(), "v2");
        assert_eq!(fetcher.call_count(Method::GET, "/img/speaker.png"), 2);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_without_cache_surfaces_failure() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;
        fetcher.set_offline(true);

        assert!(worker.fetch(&FetchRequest::image(url("/img/none.png"))).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_first_serves_precached_shell() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;
        let calls_after_install = fetcher.calls().len();

        let response = worker.fetch(&FetchRequest::get(url("/css/style.css"))).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.response.text(), "body{}");
        assert_eq!(fetcher.calls().len(), calls_after_install);
    }

    #[tokio::test]
    async fn test_cache_first_navigation_falls_back_to_offline_page() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;
        fetcher.set_offline(true);

        let response = worker
            .fetch(&FetchRequest::navigate(url("/events/42")))
            .await
            .unwrap();
        assert_eq!(response.source, ResponseSource::OfflineFallback);
        assert_eq!(response.response.text(), "<html>offline</html>");

        // 非导航请求不使用兜底页面
        assert!(worker.fetch(&FetchRequest::get(url("/js/app.js"))).await.is_err());
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_pass_through() {
        let fetcher = seeded_fetcher();
        let worker = activated_worker(&fetcher).await;

        let post = FetchRequest::post_json(url("/api/votes"), &serde_json::json!({"choice": 1})).unwrap();
        let response = worker.fetch(&post).await.unwrap();
        assert_eq!(response.source, ResponseSource::Network);

        let cross = FetchRequest::get(Url::parse("https://cdn.example.com/lib.js").unwrap());
        let response = worker.fetch(&cross).await.unwrap();
        assert_eq!(response.response.status, 404);
        let runtime = worker.caches().open("lightning-talk-runtime-v1").unwrap();
        assert!(runtime.is_empty());
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_network_response() {
        let fetcher = seeded_fetcher();
        fetcher.respond("/api/events", 200, r#"[{"id":1}]"#);
        fetcher.respond("/images/logo.png", 200, "png");
        fetcher.respond("/js/app.js", 200, "app()");
        let worker = activated_worker(&fetcher).await;
        worker.caches().set_fail_writes(true);

        let api = worker.fetch(&FetchRequest::get(url("/api/events"))).await.unwrap();
        assert_eq!(api.source, ResponseSource::Network);
        assert_eq!(api.response.text(), r#"[{"id":1}]"#);

        let image = worker.fetch(&FetchRequest::image(url("/images/logo.png"))).await.unwrap();
        assert_eq!(image.source, ResponseSource::Network);

        let script = worker.fetch(&FetchRequest::get(url("/js/app.js"))).await.unwrap();
        assert_eq!(script.source, ResponseSource::Network);
        assert_eq!(script.response.text(), "app()");

        let runtime = worker.caches().open("lightning-talk-runtime-v1").unwrap();
        assert!(runtime.is_empty());
    }

    #[test]
    fn test_worker_message_wire_format() {
        let message: WorkerMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(message, WorkerMessage::SkipWaiting);
    }
}
