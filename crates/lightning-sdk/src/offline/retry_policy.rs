//! 后台同步失败后的重试策略

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::LightningSDKError;

/// 同步失败原因分类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncFailureReason {
    /// 网络不可用或超时 - 可重试
    NetworkUnavailable,
    /// 服务端错误 - 5xx 与 429 可重试
    ServerError(u16),
    /// 部分记录失败 - 可重试
    Partial,
    /// 本地存储或数据错误 - 不重试
    Local(String),
}

impl SyncFailureReason {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncFailureReason::NetworkUnavailable => true,
            SyncFailureReason::ServerError(code) => *code >= 500 || *code == 429,
            SyncFailureReason::Partial => true,
            SyncFailureReason::Local(_) => false,
        }
    }

    /// 延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            SyncFailureReason::ServerError(429) => 3.0,
            SyncFailureReason::ServerError(_) => 1.5,
            _ => 1.0,
        }
    }
}

impl From<&LightningSDKError> for SyncFailureReason {
    fn from(error: &LightningSDKError) -> Self {
        match error {
            LightningSDKError::Transport(_)
            | LightningSDKError::Timeout(_)
            | LightningSDKError::NotConnected => SyncFailureReason::NetworkUnavailable,
            LightningSDKError::Http { status, .. } => SyncFailureReason::ServerError(*status),
            LightningSDKError::SyncIncomplete { .. } => SyncFailureReason::Partial,
            other => SyncFailureReason::Local(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub fn should_retry(&self, retry_count: u32, reason: &SyncFailureReason) -> bool {
        retry_count < self.config.max_retries && reason.is_retryable()
    }

    /// 第 `retry_count` 次重试（从 0 开始）前的等待时间；不应重试时返回 None
    pub fn next_delay(&self, retry_count: u32, reason: &SyncFailureReason) -> Option<Duration> {
        if !self.should_retry(retry_count, reason) {
            return None;
        }

        // base * factor^n，再乘失败原因倍数
        let base = self.config.base_delay_ms as f64 * self.config.backoff_factor.powf(retry_count as f64);
        let adjusted = base * reason.delay_multiplier();
        let capped = adjusted.min(self.config.max_delay_ms as f64);

        let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped + jitter).max(0.0);
        Some(Duration::from_millis(final_delay as u64))
    }
}
