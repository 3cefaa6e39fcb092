//! 缓存策略选择

use reqwest::{Method, Url};

use super::request::{FetchRequest, RequestDestination};
use crate::config::OfflineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// 不拦截：非 GET、跨源、或 worker 尚未激活
    Passthrough,
    /// API：先网络，失败回落缓存
    NetworkFirst,
    /// 图片：先返回缓存，后台刷新
    StaleWhileRevalidate,
    /// 其他资源：先缓存，未命中再网络
    CacheFirst,
}

/// 按请求选择策略
pub fn select_strategy(request: &FetchRequest, origin: &Url, config: &OfflineConfig) -> CacheStrategy {
    if request.method != Method::GET {
        return CacheStrategy::Passthrough;
    }
    if request.url.origin() != origin.origin() {
        return CacheStrategy::Passthrough;
    }
    if request.url.path().starts_with(&config.api_prefix) {
        return CacheStrategy::NetworkFirst;
    }
    if request.destination == RequestDestination::Image {
        return CacheStrategy::StaleWhileRevalidate;
    }
    CacheStrategy::CacheFirst
}
