use thiserror::Error;

#[derive(Debug, Error)]
pub enum LightningSDKError {
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(String), // 传输层错误（连接失败、网络不可达）
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    // 后台同步未完成：部分记录 POST 失败，需要整体重新调度
    #[error("Sync incomplete for {tag}: {synced} synced, {} failed", failed.len())]
    SyncIncomplete {
        tag: String,
        synced: usize,
        failed: Vec<String>,
    },
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for LightningSDKError {
    fn from(error: std::io::Error) -> Self {
        LightningSDKError::IO(error.to_string())
    }
}

impl From<serde_json::Error> for LightningSDKError {
    fn from(error: serde_json::Error) -> Self {
        LightningSDKError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for LightningSDKError {
    fn from(error: bincode::Error) -> Self {
        LightningSDKError::Serialization(error.to_string())
    }
}

impl From<sled::Error> for LightningSDKError {
    fn from(error: sled::Error) -> Self {
        LightningSDKError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for LightningSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LightningSDKError::Timeout(error.to_string())
        } else {
            LightningSDKError::Transport(error.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LightningSDKError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        LightningSDKError::Transport(error.to_string())
    }
}

impl LightningSDKError {
    /// 是否属于可重试的瞬时错误（网络抖动、超时、5xx）
    pub fn is_transient(&self) -> bool {
        match self {
            LightningSDKError::Transport(_)
            | LightningSDKError::Timeout(_)
            | LightningSDKError::NotConnected
            | LightningSDKError::SyncIncomplete { .. } => true,
            LightningSDKError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LightningSDKError>;
