//! KV 存储模块 - 基于 sled 的键值存储
//!
//! 本模块提供：
//! - 按用途隔离的命名 Tree（凭证、缓存分区、待同步记录）
//! - JSON 值读写与前缀扫描
//! - Tree 的枚举与删除（缓存分区清理用）

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{LightningSDKError, Result};

/// KV 存储组件
#[derive(Debug, Clone)]
pub struct KvStore {
    base_path: PathBuf,
    /// 主数据库实例
    db: Arc<Db>,
}

impl KvStore {
    /// 打开（或创建）`<base_path>/kv` 下的 KV 存储
    pub async fn new(base_path: &Path) -> Result<Self> {
        let base_path = base_path.to_path_buf();
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| LightningSDKError::IO(format!("创建 KV 存储目录失败: {}", e)))?;

        // 上一个实例可能刚释放文件锁，重试多次带退避
        const MAX_OPEN_RETRIES: u32 = 6;
        const RETRY_DELAY_MS: u64 = 200;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(db) => {
                    tracing::debug!("KV 存储已打开: {}", kv_path.display());
                    return Ok(Self {
                        base_path,
                        db: Arc::new(db),
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(LightningSDKError::KvStore(
            last_err
                .map(|e| format!("打开 sled 数据库失败: {}", e))
                .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
        ))
    }

    /// 临时存储（测试用，进程退出后删除）
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| LightningSDKError::KvStore(format!("打开临时数据库失败: {}", e)))?;
        Ok(Self {
            base_path: PathBuf::new(),
            db: Arc::new(db),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 打开命名 Tree
    pub fn tree(&self, name: &str) -> Result<Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| LightningSDKError::KvStore(format!("打开 Tree {} 失败: {}", name, e)))
    }

    /// 是否存在指定名称的 Tree
    pub fn has_tree(&self, name: &str) -> bool {
        self.tree_names().iter().any(|existing| existing == name)
    }

    /// 列出所有命名 Tree（不含默认 Tree）
    pub fn tree_names(&self) -> Vec<String> {
        let default_name: &[u8] = b"__sled__default";
        self.db
            .tree_names()
            .into_iter()
            .filter(|name| name.as_ref() != default_name)
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .collect()
    }

    /// 删除命名 Tree；不存在时返回 false
    pub fn drop_tree(&self, name: &str) -> Result<bool> {
        self.db
            .drop_tree(name)
            .map_err(|e| LightningSDKError::KvStore(format!("删除 Tree {} 失败: {}", name, e)))
    }

    /// 设置键值对（JSON 编码）
    pub fn set<V>(&self, tree: &str, key: &str, value: &V) -> Result<()>
    where
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| LightningSDKError::Serialization(format!("序列化值失败: {}", e)))?;
        self.tree(tree)?
            .insert(key, value_bytes)
            .map_err(|e| LightningSDKError::KvStore(format!("设置键值对失败: {}", e)))?;
        Ok(())
    }

    /// 获取键值对
    pub fn get<V>(&self, tree: &str, key: &str) -> Result<Option<V>>
    where
        V: for<'de> Deserialize<'de>,
    {
        let result = self
            .tree(tree)?
            .get(key)
            .map_err(|e| LightningSDKError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| LightningSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对，返回是否存在
    pub fn delete(&self, tree: &str, key: &str) -> Result<bool> {
        let result = self
            .tree(tree)?
            .remove(key)
            .map_err(|e| LightningSDKError::KvStore(format!("删除键值对失败: {}", e)))?;
        Ok(result.is_some())
    }

    /// 获取指定前缀的所有键值对
    pub fn scan_prefix<V>(&self, tree: &str, prefix: &str) -> Result<Vec<(String, V)>>
    where
        V: for<'de> Deserialize<'de>,
    {
        let mut results = Vec::new();
        for item in self.tree(tree)?.scan_prefix(prefix) {
            let (key, value_bytes) =
                item.map_err(|e| LightningSDKError::KvStore(format!("扫描前缀失败: {}", e)))?;
            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| LightningSDKError::Serialization(format!("反序列化值失败: {}", e)))?;
            results.push((String::from_utf8_lossy(&key).into_owned(), value));
        }
        Ok(results)
    }

    /// 刷盘
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| LightningSDKError::KvStore(format!("刷盘失败: {}", e)))?;
        Ok(())
    }
}
