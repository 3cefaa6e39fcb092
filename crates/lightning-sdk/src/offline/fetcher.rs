//! 网络请求
//!
//! [`Fetcher`] 只有在网络层失败（无法连接、超时）时返回 `Err`；
//! 服务端返回的任何状态码都作为正常响应交给调用方判断。

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::request::{CachedResponse, FetchRequest};
use crate::config::HttpClientConfig;
use crate::error::{LightningSDKError, Result};

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse>;
}

/// reqwest 实现
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(crate::version::user_agent());

        if let Some(timeout) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| LightningSDKError::Other(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 客户端已创建");
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!("跳过非法请求头: {}", name);
                continue;
            };
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        debug!("🌐 {} {} -> {}", request.method, request.url, status);
        Ok(CachedResponse {
            url,
            status,
            headers,
            body: body.to_vec(),
            stored_at: crate::utils::now_millis(),
        })
    }
}

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use parking_lot::Mutex;
    use reqwest::Method;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// 测试用网络：按 URL 返回预设响应，可整体切换为离线
    #[derive(Default)]
    pub struct MockFetcher {
        routes: Mutex<HashMap<String, CachedResponse>>,
        offline: AtomicBool,
        calls: Mutex<Vec<(Method, String, Option<Vec<u8>>)>>,
        failing: Mutex<Vec<String>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        /// 为 URL 设定响应（请求路径相对 http://localhost:3000）
        pub fn respond(&self, path: &str, status: u16, body: &str) {
            let url = format!("http://localhost:3000{}", path);
            self.routes
                .lock()
                .insert(url.clone(), CachedResponse::new(url, status, body.as_bytes().to_vec()));
        }

        /// 指定 URL 的请求按网络错误失败
        pub fn fail_path(&self, path: &str) {
            self.failing.lock().push(format!("http://localhost:3000{}", path));
        }

        pub fn clear_failures(&self) {
            self.failing.lock().clear();
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// 每次请求的网络耗时
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        pub fn calls(&self) -> Vec<(Method, String, Option<Vec<u8>>)> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self, method: Method, path: &str) -> usize {
            let url = format!("http://localhost:3000{}", path);
            self.calls
                .lock()
                .iter()
                .filter(|(m, u, _)| *m == method && *u == url)
                .count()
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<CachedResponse> {
            let url = request.cache_key();
            self.calls
                .lock()
                .push((request.method.clone(), url.clone(), request.body.clone()));

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.offline.load(Ordering::SeqCst) || self.failing.lock().contains(&url) {
                return Err(LightningSDKError::Transport(format!("network unreachable: {}", url)));
            }
            let mut response = self
                .routes
                .lock()
                .get(&url)
                .cloned()
                .unwrap_or_else(|| CachedResponse::new(url.clone(), 404, Vec::new()));
            response.stored_at = crate::utils::now_millis();
            Ok(response)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[test]
    fn test_http_fetcher_builds_with_defaults() {
        assert!(HttpFetcher::new(&HttpClientConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_http_fetcher_reports_network_failure() {
        let fetcher = HttpFetcher::new(&HttpClientConfig {
            connect_timeout_secs: Some(1),
            request_timeout_secs: Some(2),
        })
        .unwrap();
        let request = FetchRequest::get(Url::parse("http://127.0.0.1:9/api/events").unwrap());
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(err.is_transient());
    }
}
