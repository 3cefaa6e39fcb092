//! 凭证存储
//!
//! 凭证保存在持久 KV 中，并可能被其他执行上下文（另一个窗口、另一个进程）
//! 改写。[`CredentialStore::watch`] 把这些带外变化推送给实时客户端。

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{KvStore, AUTH_TREE};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 读取当前凭证
    async fn load(&self) -> Result<Option<String>>;

    /// 写入凭证；None 表示删除
    async fn store(&self, token: Option<&str>) -> Result<()>;

    /// 订阅凭证变化
    fn watch(&self) -> mpsc::UnboundedReceiver<Option<String>>;
}

/// sled 持久化的凭证
pub struct KvCredentialStore {
    kv: KvStore,
    key: String,
}

impl KvCredentialStore {
    pub fn new(kv: KvStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }
}

#[async_trait]
impl CredentialStore for KvCredentialStore {
    async fn load(&self) -> Result<Option<String>> {
        self.kv.get::<String>(AUTH_TREE, &self.key)
    }

    async fn store(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) => self.kv.set(AUTH_TREE, &self.key, &token)?,
            None => {
                self.kv.delete(AUTH_TREE, &self.key)?;
            }
        }
        Ok(())
    }

    fn watch(&self) -> mpsc::UnboundedReceiver<Option<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let tree = match self.kv.tree(AUTH_TREE) {
            Ok(tree) => tree,
            Err(e) => {
                warn!("无法监听凭证变化: {}", e);
                return rx;
            }
        };
        let mut subscriber = tree.watch_prefix(self.key.as_bytes());
        let key = self.key.clone();

        // sled 的订阅是阻塞迭代器，放到阻塞线程池里轮询
        tokio::task::spawn_blocking(move || loop {
            if tx.is_closed() {
                break;
            }
            let event = match subscriber.next_timeout(Duration::from_millis(500)) {
                Ok(event) => event,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            };
            let change = match event {
                sled::Event::Insert { key: changed, value } if changed.as_ref() == key.as_bytes() => {
                    match serde_json::from_slice::<String>(&value) {
                        Ok(token) => Some(Some(token)),
                        Err(e) => {
                            warn!("凭证格式错误，忽略: {}", e);
                            None
                        }
                    }
                }
                sled::Event::Remove { key: changed } if changed.as_ref() == key.as_bytes() => Some(None),
                _ => None,
            };
            if let Some(change) = change {
                debug!("凭证发生变化");
                if tx.send(change).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// 内存凭证（测试与无持久化场景）
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<Option<String>>>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            token: RwLock::new(initial),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// 模拟另一个上下文改写凭证
    pub fn set_external(&self, token: Option<String>) {
        *self.token.write() = token.clone();
        self.watchers.lock().retain(|tx| tx.send(token.clone()).is_ok());
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.token.read().clone())
    }

    async fn store(&self, token: Option<&str>) -> Result<()> {
        *self.token.write() = token.map(str::to_string);
        Ok(())
    }

    fn watch(&self) -> mpsc::UnboundedReceiver<Option<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(tx);
        rx
    }
}
