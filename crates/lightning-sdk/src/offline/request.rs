//! 被拦截的请求与缓存的响应

use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LightningSDKError, Result};

/// 请求的资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestDestination {
    Document,
    Image,
    Script,
    Style,
    Font,
    Manifest,
    /// fetch()/XHR 等无特定类型的请求
    Empty,
}

/// 请求模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    /// 页面导航
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

/// 一个被拦截的请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub destination: RequestDestination,
    pub mode: RequestMode,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| LightningSDKError::InvalidArgument(format!("URL 无效 {}: {}", url, e)))?;
        Ok(Self {
            method,
            ..Self::get(url)
        })
    }

    /// 页面导航请求
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: RequestDestination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn image(url: Url) -> Self {
        Self {
            destination: RequestDestination::Image,
            mode: RequestMode::NoCors,
            ..Self::get(url)
        }
    }

    /// JSON POST
    pub fn post_json(url: Url, body: &serde_json::Value) -> Result<Self> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(Self {
            method: Method::POST,
            headers,
            body: Some(serde_json::to_vec(body)?),
            ..Self::get(url)
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// 缓存键：不含 fragment 的完整 URL
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

pub(crate) fn cache_key_for(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// 缓存中的响应（bincode 编码后写入 sled）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// 写入缓存的时间（UTC毫秒）
    pub stored_at: i64,
}

impl CachedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            stored_at: crate::utils::now_millis(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// 2xx
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = FetchRequest::parse(Method::GET, "http://localhost:3000/index.html#top").unwrap();
        assert_eq!(request.cache_key(), "http://localhost:3000/index.html");
    }

    #[test]
    fn test_post_json_sets_body_and_header() {
        let url = Url::parse("http://localhost:3000/api/votes").unwrap();
        let request = FetchRequest::post_json(url, &serde_json::json!({"choice": "a"})).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(request.body.unwrap(), br#"{"choice":"a"}"#.to_vec());
    }

    #[test]
    fn test_response_helpers() {
        let response = CachedResponse::new("http://x/", 200, br#"{"ok":true}"#.to_vec());
        assert!(response.is_ok());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
        assert!(!CachedResponse::new("http://x/", 503, Vec::new()).is_ok());
    }
}
