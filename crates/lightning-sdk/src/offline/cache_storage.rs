//! 缓存分区
//!
//! 每个命名分区对应 sled 中的一个 `cache::<分区名>` Tree，
//! 键为请求 URL，值为 bincode 编码的 [`CachedResponse`]。

use sled::Tree;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(test)]
use std::sync::Arc;
use tracing::debug;

use super::request::{CachedResponse, FetchRequest};
use crate::error::{LightningSDKError, Result};
use crate::storage::{KvStore, CACHE_TREE_PREFIX};

/// 所有缓存分区
#[derive(Debug, Clone)]
pub struct CacheStorage {
    kv: KvStore,
    #[cfg(test)]
    fail_writes: Arc<AtomicBool>,
}

impl CacheStorage {
    pub fn new(kv: KvStore) -> Self {
        Self {
            kv,
            #[cfg(test)]
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 让之后的所有写入失败
    #[cfg(test)]
    pub(crate) fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn tree_name(name: &str) -> String {
        format!("{}{}", CACHE_TREE_PREFIX, name)
    }

    /// 打开（不存在则创建）分区
    pub fn open(&self, name: &str) -> Result<Cache> {
        let tree = self.kv.tree(&Self::tree_name(name))?;
        Ok(Cache {
            name: name.to_string(),
            tree,
            #[cfg(test)]
            fail_writes: self.fail_writes.clone(),
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.kv.has_tree(&Self::tree_name(name))
    }

    /// 全部分区名
    pub fn keys(&self) -> Vec<String> {
        self.kv
            .tree_names()
            .into_iter()
            .filter_map(|tree| tree.strip_prefix(CACHE_TREE_PREFIX).map(str::to_string))
            .collect()
    }

    /// 删除分区
    pub fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.kv.drop_tree(&Self::tree_name(name))?;
        if removed {
            debug!("已删除缓存分区: {}", name);
        }
        Ok(removed)
    }

    /// 依次在各分区中查找
    pub fn match_any(&self, request: &FetchRequest) -> Result<Option<CachedResponse>> {
        for name in self.keys() {
            if let Some(response) = self.open(&name)?.match_request(request)? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// 单个缓存分区
#[derive(Debug, Clone)]
pub struct Cache {
    name: String,
    tree: Tree,
    #[cfg(test)]
    fail_writes: Arc<AtomicBool>,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 写入（覆盖同键）
    pub fn put(&self, request: &FetchRequest, response: &CachedResponse) -> Result<()> {
        self.put_key(&request.cache_key(), response)
    }

    pub(crate) fn put_key(&self, key: &str, response: &CachedResponse) -> Result<()> {
        #[cfg(test)]
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LightningSDKError::Cache(format!("写入缓存 {} 失败: 只读", self.name)));
        }
        let bytes = bincode::serialize(response)?;
        self.tree
            .insert(key.as_bytes(), bytes)
            .map_err(|e| LightningSDKError::Cache(format!("写入缓存 {} 失败: {}", self.name, e)))?;
        Ok(())
    }

    pub fn match_request(&self, request: &FetchRequest) -> Result<Option<CachedResponse>> {
        self.match_key(&request.cache_key())
    }

    pub(crate) fn match_key(&self, key: &str) -> Result<Option<CachedResponse>> {
        let bytes = self
            .tree
            .get(key.as_bytes())
            .map_err(|e| LightningSDKError::Cache(format!("读取缓存 {} 失败: {}", self.name, e)))?;
        match bytes {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, request: &FetchRequest) -> Result<bool> {
        let removed = self
            .tree
            .remove(request.cache_key().as_bytes())
            .map_err(|e| LightningSDKError::Cache(format!("删除缓存项失败: {}", e)))?;
        Ok(removed.is_some())
    }

    /// 分区内所有键
    pub fn keys(&self) -> Result<Vec<String>> {
        self.tree
            .iter()
            .keys()
            .map(|key| {
                key.map(|k| String::from_utf8_lossy(&k).into_owned())
                    .map_err(|e| LightningSDKError::Cache(format!("遍历缓存失败: {}", e)))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn request(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("http://localhost:3000").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_put_and_match() {
        let storage = CacheStorage::new(KvStore::temporary().unwrap());
        let cache = storage.open("lightning-talk-runtime-v1").unwrap();

        let req = request("/api/events");
        let response = CachedResponse::new(req.cache_key(), 200, b"[]".to_vec());
        cache.put(&req, &response).unwrap();

        assert_eq!(cache.match_request(&req).unwrap(), Some(response.clone()));
        assert_eq!(storage.match_any(&req).unwrap(), Some(response));
        assert!(storage.match_any(&request("/api/other")).unwrap().is_none());
        assert_eq!(cache.keys().unwrap(), vec!["http://localhost:3000/api/events".to_string()]);
    }

    #[test]
    fn test_keys_and_delete() {
        let kv = KvStore::temporary().unwrap();
        kv.set("pending_votes", "x", &1u8).unwrap();
        let storage = CacheStorage::new(kv);
        storage.open("a-static-v1").unwrap();
        storage.open("a-runtime-v1").unwrap();

        let mut keys = storage.keys();
        keys.sort();
        assert_eq!(keys, vec!["a-runtime-v1".to_string(), "a-static-v1".to_string()]);

        assert!(storage.delete("a-static-v1").unwrap());
        assert!(!storage.has("a-static-v1"));
        assert!(storage.has("a-runtime-v1"));
    }
}
