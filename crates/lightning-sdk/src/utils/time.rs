//! 时间工具
//!
//! 存储层与事件中的时间字段统一使用 UTC 毫秒时间戳。

use chrono::Utc;

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 当前 UTC 秒时间戳
pub fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_consistent() {
        let millis = now_millis();
        let secs = now_secs() as i64;
        assert!((millis / 1000 - secs).abs() <= 1);
    }
}
