//! 日志初始化
//!
//! SDK 内部统一使用 `tracing`，宿主应用可以自行安装 subscriber；
//! 未安装时可调用 [`init_tracing`] 使用默认的 fmt 输出。

use tracing::Level;

/// 安装默认的 fmt subscriber
///
/// 调试模式输出 DEBUG 级别，否则 INFO。重复调用（或宿主已安装 subscriber）时静默忽略。
pub fn init_tracing(debug_mode: bool) {
    let level = if debug_mode { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init();
}
