//! SDK 配置
//!
//! 所有配置项均可序列化，既可以用构建器在代码中组装，也可以从 JSON 文件加载。

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LightningSDKError, Result};
use crate::offline::background_sync::SyncFailurePolicy;

/// 实时连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket 服务地址（ws:// 或 wss://）
    pub server_url: String,
    /// 单次连接尝试超时（秒）
    pub connect_timeout_secs: u64,
    /// 重连基础延迟（毫秒），第 k 次重连延迟为 base * 2^(k-1)
    pub reconnect_base_delay_ms: u64,
    /// 自动重连次数上限，超过后进入 Exhausted 状态
    pub max_reconnect_attempts: u32,
    /// 凭证在本地 KV 中的键名
    pub auth_storage_key: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:3000/ws".to_string(),
            connect_timeout_secs: 20,
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: 5,
            auth_storage_key: "authToken".to_string(),
        }
    }
}

impl RealtimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

/// 离线缓存 / 后台同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// 应用源（scheme://host:port），跨源请求不拦截
    pub origin: String,
    /// 缓存分区名前缀，用于识别本应用的分区
    pub cache_prefix: String,
    /// 缓存版本号，嵌入到分区名中
    pub cache_version: String,
    /// 安装阶段预缓存的关键资源（相对路径）
    pub static_assets: Vec<String>,
    /// API 路径前缀（网络优先）
    pub api_prefix: String,
    /// 离线兜底页面
    pub offline_page: String,
    /// 应用根地址（通知点击后打开）
    pub root_url: String,
    /// 安装完成后是否立即激活（skipWaiting）
    pub skip_waiting: bool,
    /// 待同步聊天消息的 POST 目标
    pub message_sync_endpoint: String,
    /// 待同步投票的 POST 目标
    pub vote_sync_endpoint: String,
    /// 同步批次内单条失败时的处理方式
    pub sync_failure_policy: SyncFailurePolicy,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            cache_prefix: "lightning-talk".to_string(),
            cache_version: "v1".to_string(),
            static_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/offline.html".to_string(),
                "/css/style.css".to_string(),
                "/js/main.js".to_string(),
                "/js/socket-service.js".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
                "/manifest.json".to_string(),
            ],
            api_prefix: "/api/".to_string(),
            offline_page: "/offline.html".to_string(),
            root_url: "/".to_string(),
            skip_waiting: true,
            message_sync_endpoint: "/api/chat/messages".to_string(),
            vote_sync_endpoint: "/api/votes".to_string(),
            sync_failure_policy: SyncFailurePolicy::default(),
        }
    }
}

impl OfflineConfig {
    /// 静态资源分区名，例如 `lightning-talk-static-v1`
    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.cache_prefix, self.cache_version)
    }

    /// 运行时分区名，例如 `lightning-talk-runtime-v1`
    pub fn runtime_cache_name(&self) -> String {
        format!("{}-runtime-{}", self.cache_prefix, self.cache_version)
    }

    /// 当前版本的全部分区名
    pub fn current_cache_names(&self) -> [String; 2] {
        [self.static_cache_name(), self.runtime_cache_name()]
    }

    /// 解析应用源
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| LightningSDKError::Config(format!("origin 无效 {}: {}", self.origin, e)))
    }

    /// 把相对路径解析为应用源下的绝对地址
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin_url()?
            .join(path)
            .map_err(|e| LightningSDKError::Config(format!("路径无效 {}: {}", path, e)))
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(30),
        }
    }
}

/// 后台同步重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 300_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Lightning SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightningConfig {
    /// 数据存储目录（sled KV 所在位置）
    pub data_dir: PathBuf,
    /// 调试模式（DEBUG 级别日志）
    pub debug_mode: bool,
    /// 实时连接配置
    pub realtime: RealtimeConfig,
    /// 离线缓存配置
    pub offline: OfflineConfig,
    /// HTTP 客户端配置
    pub http_client_config: HttpClientConfig,
    /// 后台同步重试配置
    pub sync_retry: RetryConfig,
}

impl Default for LightningConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            debug_mode: false,
            realtime: RealtimeConfig::default(),
            offline: OfflineConfig::default(),
            http_client_config: HttpClientConfig::default(),
            sync_retry: RetryConfig::default(),
        }
    }
}

/// 获取默认数据目录 ~/.lightning-talk/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".lightning-talk")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        // Windows 支持
        home_dir.join(".lightning-talk")
    } else {
        PathBuf::from("./lightning_talk_data")
    }
}

impl LightningConfig {
    pub fn builder() -> LightningConfigBuilder {
        LightningConfigBuilder::new()
    }

    /// 从 JSON 字符串加载（缺失字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LightningConfig = serde_json::from_str(json)
            .map_err(|e| LightningSDKError::Config(format!("解析配置失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LightningSDKError::Config(format!("读取配置文件失败 {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        let server = Url::parse(&self.realtime.server_url).map_err(|e| {
            LightningSDKError::Config(format!("server_url 无效 {}: {}", self.realtime.server_url, e))
        })?;
        if !matches!(server.scheme(), "ws" | "wss") {
            return Err(LightningSDKError::Config(format!(
                "server_url 必须是 ws:// 或 wss://，当前: {}",
                self.realtime.server_url
            )));
        }
        if self.realtime.connect_timeout_secs == 0 {
            return Err(LightningSDKError::Config("connect_timeout_secs 不能为 0".to_string()));
        }
        if self.realtime.max_reconnect_attempts == 0 {
            return Err(LightningSDKError::Config("max_reconnect_attempts 不能为 0".to_string()));
        }
        if self.realtime.auth_storage_key.is_empty() {
            return Err(LightningSDKError::Config("auth_storage_key 不能为空".to_string()));
        }
        self.offline.origin_url()?;
        if self.offline.cache_version.is_empty() {
            return Err(LightningSDKError::Config("cache_version 不能为空".to_string()));
        }
        if !self.offline.api_prefix.starts_with('/') {
            return Err(LightningSDKError::Config(format!(
                "api_prefix 必须以 / 开头，当前: {}",
                self.offline.api_prefix
            )));
        }
        Ok(())
    }
}

/// Lightning SDK 配置构建器
pub struct LightningConfigBuilder {
    config: LightningConfig,
}

impl LightningConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LightningConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    /// 设置实时服务地址
    pub fn server_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.realtime.server_url = url.into();
        self
    }

    pub fn connect_timeout(mut self, secs: u64) -> Self {
        self.config.realtime.connect_timeout_secs = secs;
        self
    }

    pub fn reconnect_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.realtime.reconnect_base_delay_ms = delay_ms;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.realtime.max_reconnect_attempts = attempts;
        self
    }

    pub fn auth_storage_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.realtime.auth_storage_key = key.into();
        self
    }

    /// 设置应用源
    pub fn origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.config.offline.origin = origin.into();
        self
    }

    pub fn cache_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.offline.cache_version = version.into();
        self
    }

    /// 设置预缓存资源列表
    pub fn static_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.offline.static_assets = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn offline_config(mut self, config: OfflineConfig) -> Self {
        self.config.offline = config;
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn sync_retry(mut self, config: RetryConfig) -> Self {
        self.config.sync_retry = config;
        self
    }

    pub fn build(self) -> LightningConfig {
        self.config
    }
}

impl Default for LightningConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LightningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.realtime.connect_timeout_secs, 20);
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.offline.static_cache_name(), "lightning-talk-static-v1");
        assert_eq!(config.offline.runtime_cache_name(), "lightning-talk-runtime-v1");
    }

    #[test]
    fn test_builder() {
        let config = LightningConfig::builder()
            .server_url("wss://talks.example.com/ws")
            .reconnect_base_delay_ms(250)
            .max_reconnect_attempts(3)
            .origin("https://talks.example.com")
            .cache_version("v7")
            .static_assets(["/", "/offline.html"])
            .build();

        assert!(config.validate().is_ok());
        assert_eq!(config.realtime.reconnect_base_delay(), Duration::from_millis(250));
        assert_eq!(config.offline.static_cache_name(), "lightning-talk-static-v7");
        assert_eq!(config.offline.static_assets.len(), 2);
    }

    #[test]
    fn test_from_json_with_partial_fields() {
        let config = LightningConfig::from_json_str(
            r#"{"realtime": {"server_url": "ws://127.0.0.1:9000/ws"}, "offline": {"cache_version": "v2"}}"#,
        )
        .unwrap();
        assert_eq!(config.realtime.server_url, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.realtime.connect_timeout_secs, 20);
        assert_eq!(config.offline.cache_version, "v2");
        assert_eq!(config.offline.api_prefix, "/api/");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = LightningConfig::builder().server_url("http://example.com").build();
        assert!(matches!(config.validate(), Err(LightningSDKError::Config(_))));

        let config = LightningConfig::builder().max_reconnect_attempts(0).build();
        assert!(config.validate().is_err());

        let config = LightningConfig::builder().connect_timeout(0).build();
        assert!(config.validate().is_err());

        let config = LightningConfig::builder().origin("not a url").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_paths_against_origin() {
        let offline = OfflineConfig::default();
        let url = offline.resolve("/api/events").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/events");
    }
}
