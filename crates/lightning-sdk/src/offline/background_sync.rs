//! 后台同步
//!
//! 网络恢复后把待同步表中 `synced == false` 的记录逐条 POST 到对应接口，
//! 成功后才置位。投递语义为至少一次：接口需要容忍重复提交。

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::fetcher::Fetcher;
use super::request::FetchRequest;
use super::retry_policy::{RetryPolicy, SyncFailureReason};
use super::sync_queue::{PendingSyncStore, SyncTable};
use crate::config::OfflineConfig;
use crate::error::{LightningSDKError, Result};
use crate::network::NetworkMonitor;

/// 批次内单条记录失败时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailurePolicy {
    /// 继续处理其余记录，结束后整体报告未完成
    #[default]
    ContinueOnError,
    /// 遇到第一条失败立即中止
    FailFast,
}

/// 同步标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncTag {
    Messages,
    Votes,
}

impl SyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::Messages => "sync-messages",
            SyncTag::Votes => "sync-votes",
        }
    }

    pub fn table(&self) -> SyncTable {
        match self {
            SyncTag::Messages => SyncTable::Messages,
            SyncTag::Votes => SyncTable::Votes,
        }
    }

    fn endpoint<'a>(&self, config: &'a OfflineConfig) -> &'a str {
        match self {
            SyncTag::Messages => &config.message_sync_endpoint,
            SyncTag::Votes => &config.vote_sync_endpoint,
        }
    }
}

impl std::fmt::Display for SyncTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTag {
    type Err = LightningSDKError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sync-messages" => Ok(SyncTag::Messages),
            "sync-votes" => Ok(SyncTag::Votes),
            other => Err(LightningSDKError::InvalidArgument(format!("未知同步标签: {}", other))),
        }
    }
}

/// 一次同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub tag: SyncTag,
    /// 本次成功提交的记录数
    pub synced: usize,
}

/// 执行单个标签的同步
#[derive(Clone)]
pub struct BackgroundSync {
    store: PendingSyncStore,
    fetcher: Arc<dyn Fetcher>,
    config: OfflineConfig,
}

impl BackgroundSync {
    pub fn new(store: PendingSyncStore, fetcher: Arc<dyn Fetcher>, config: OfflineConfig) -> Self {
        Self { store, fetcher, config }
    }

    pub fn store(&self) -> &PendingSyncStore {
        &self.store
    }

    pub async fn run(&self, tag: SyncTag) -> Result<SyncReport> {
        let table = tag.table();
        let endpoint = self.config.resolve(tag.endpoint(&self.config))?;
        let records = self.store.unsynced(table)?;
        if records.is_empty() {
            debug!("{}: 没有待同步记录", tag);
            return Ok(SyncReport { tag, synced: 0 });
        }
        info!("🔄 {}: 开始同步 {} 条记录", tag, records.len());

        let mut synced = 0;
        let mut failed = Vec::new();
        for record in records {
            let request = FetchRequest::post_json(endpoint.clone(), &record.payload)?;
            let outcome = match self.fetcher.fetch(&request).await {
                Ok(response) if response.is_ok() => Ok(()),
                Ok(response) => Err(LightningSDKError::Http {
                    status: response.status,
                    url: endpoint.to_string(),
                }),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.store.mark_synced(table, &record.id)?;
                    synced += 1;
                }
                Err(e) => {
                    warn!("{}: 记录 {} 同步失败: {}", tag, record.id, e);
                    match self.config.sync_failure_policy {
                        SyncFailurePolicy::FailFast => return Err(e),
                        SyncFailurePolicy::ContinueOnError => failed.push(record.id),
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(LightningSDKError::SyncIncomplete {
                tag: tag.as_str().to_string(),
                synced,
                failed,
            });
        }
        info!("✅ {}: 同步完成 {} 条", tag, synced);
        Ok(SyncReport { tag, synced })
    }
}

struct SchedulerInner {
    sync: BackgroundSync,
    policy: RetryPolicy,
    network: NetworkMonitor,
    /// 已注册标签及其注册代数，每次 register 递增
    pending: Mutex<BTreeMap<SyncTag, u64>>,
    /// 同一时刻只有一个 flush
    flushing: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// 同步注册表：网络恢复或显式 flush 时执行已注册的标签
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<SchedulerInner>,
}

impl SyncScheduler {
    pub fn new(sync: BackgroundSync, policy: RetryPolicy, network: NetworkMonitor) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                sync,
                policy,
                network,
                pending: Mutex::new(BTreeMap::new()),
                flushing: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn background_sync(&self) -> &BackgroundSync {
        &self.inner.sync
    }

    /// 开始监听网络恢复
    pub fn start(&self) {
        let mut events = self.inner.network.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.is_recovery() => {
                        let Some(inner) = weak.upgrade() else { break };
                        info!("🌐 网络恢复，执行后台同步");
                        SyncScheduler { inner }.flush().await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.inner.tasks.lock().push(task);
    }

    /// 注册同步标签；在线时立即在后台执行
    pub fn register(&self, tag: SyncTag) {
        {
            let mut pending = self.inner.pending.lock();
            let generation = pending.entry(tag).or_insert(0);
            *generation += 1;
            debug!("注册同步: {} (#{})", tag, generation);
        }
        if self.inner.network.is_online() {
            let scheduler = self.clone();
            let task = tokio::spawn(async move {
                scheduler.flush().await;
            });
            let mut tasks = self.inner.tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    pub fn pending_tags(&self) -> Vec<SyncTag> {
        self.inner.pending.lock().keys().copied().collect()
    }

    /// 执行所有已注册标签，失败按重试策略退避重跑
    ///
    /// 成功的标签被注销；重试耗尽的标签保留到下一次网络恢复。
    /// 执行期间再次注册的标签不会被注销，由下一次 flush 处理。
    pub async fn flush(&self) -> Vec<(SyncTag, Result<SyncReport>)> {
        let _guard = self.inner.flushing.lock().await;
        let tags: Vec<(SyncTag, u64)> = self
            .inner
            .pending
            .lock()
            .iter()
            .map(|(tag, generation)| (*tag, *generation))
            .collect();
        let mut outcomes = Vec::with_capacity(tags.len());

        for (tag, generation) in tags {
            let mut retry_count = 0;
            let outcome = loop {
                match self.inner.sync.run(tag).await {
                    Ok(report) => break Ok(report),
                    Err(e) => {
                        let reason = SyncFailureReason::from(&e);
                        match self.inner.policy.next_delay(retry_count, &reason) {
                            Some(delay) => {
                                warn!("{} 同步失败，{:?} 后重试 ({}): {}", tag, delay, retry_count + 1, e);
                                tokio::time::sleep(delay).await;
                                retry_count += 1;
                            }
                            None => {
                                error!("{} 同步放弃，等待下次网络恢复: {}", tag, e);
                                break Err(e);
                            }
                        }
                    }
                }
            };
            if outcome.is_ok() {
                let mut pending = self.inner.pending.lock();
                if pending.get(&tag) == Some(&generation) {
                    pending.remove(&tag);
                } else {
                    debug!("{} 在同步期间被重新注册，保留", tag);
                }
            }
            outcomes.push((tag, outcome));
        }
        outcomes
    }
}
