//! Lightning SDK - Lightning Talk Circle 客户端核心
//!
//! 本 SDK 包含两个互相独立的组件：
//! - 📡 实时客户端：断线指数退避重连、订阅重放、本地事件总线、凭证热更新
//! - 📴 离线 worker：按资源类型选择缓存策略、版本化缓存分区、后台同步、推送通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use lightning_sdk::{LightningConfig, LightningSDK, LocalEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LightningConfig::builder()
//!         .data_dir("/path/to/data")
//!         .server_url("wss://talks.example.com/ws")
//!         .origin("https://talks.example.com")
//!         .build();
//!
//!     let sdk = LightningSDK::initialize(config).await?;
//!
//!     sdk.realtime().on(
//!         LocalEvent::ChatMessage,
//!         lightning_sdk::events::handler(|data| println!("收到消息: {}", data)),
//!     );
//!     sdk.realtime().connect().await;
//!     sdk.realtime().subscribe_room("lobby", serde_json::json!({})).await;
//!
//!     sdk.offline().install().await?;
//!
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection_state;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod offline;
pub mod realtime;
pub mod sdk;
pub mod storage;
pub mod utils;
pub mod version;

pub use config::{HttpClientConfig, LightningConfig, LightningConfigBuilder, OfflineConfig, RealtimeConfig, RetryConfig};
pub use connection_state::{ConnectionState, ConnectionStateManager, ConnectionStatus};
pub use error::{LightningSDKError, Result};
pub use events::{EventHandler, EventHub, LocalEvent};
pub use network::{NetworkMonitor, NetworkStatus, NetworkStatusListener};
pub use offline::{
    CacheStrategy, FetchRequest, OfflineWorker, PendingSyncStore, SyncFailurePolicy, SyncScheduler, SyncTag,
    WorkerState,
};
pub use realtime::{DisconnectReason, RealtimeClient, Subscription, Transport, WsTransport};
pub use sdk::{Delivery, LightningSDK, SdkComponents};
pub use version::SDK_VERSION;
