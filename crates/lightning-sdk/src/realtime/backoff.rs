//! 重连退避：第 k 次重连延迟 `base * 2^(k-1)`，超过上限后不再重连

use std::time::Duration;

use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.reconnect_base_delay(), config.max_reconnect_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 已完成 `attempts` 次重连后是否还能继续
    pub fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// 第 `attempt` 次重连（从 1 开始）的延迟
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let backoff = ReconnectBackoff::new(Duration::from_millis(1000), 5);
        let delays: Vec<u64> = (1..=5).map(|k| backoff.delay_for(k).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_ceiling() {
        let backoff = ReconnectBackoff::new(Duration::from_millis(10), 5);
        assert!(backoff.can_retry(0));
        assert!(backoff.can_retry(4));
        assert!(!backoff.can_retry(5));
    }

    #[test]
    fn test_large_attempt_saturates() {
        let backoff = ReconnectBackoff::new(Duration::from_secs(1), 100);
        assert!(backoff.delay_for(80) >= backoff.delay_for(32));
    }
}
