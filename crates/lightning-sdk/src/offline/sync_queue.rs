//! 待同步记录
//!
//! 离线时产生的聊天消息和投票按记录 id 存入两个表，`synced` 置位后不再重发。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{LightningSDKError, Result};
use crate::storage::KvStore;

/// 待同步表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncTable {
    Messages,
    Votes,
}

impl SyncTable {
    pub fn tree_name(&self) -> &'static str {
        match self {
            SyncTable::Messages => "pending_messages",
            SyncTable::Votes => "pending_votes",
        }
    }
}

/// 一条待同步记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: String,
    /// 原样 POST 给服务端的内容
    pub payload: Value,
    /// 创建时间（UTC毫秒）
    pub created_at: i64,
    pub synced: bool,
}

#[derive(Debug, Clone)]
pub struct PendingSyncStore {
    kv: KvStore,
}

impl PendingSyncStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    /// 新增一条记录
    pub fn enqueue(&self, table: SyncTable, payload: Value) -> Result<PendingRecord> {
        let record = PendingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            created_at: crate::utils::now_millis(),
            synced: false,
        };
        self.put(table, &record)?;
        debug!("📝 记录待同步 {}: {}", table.tree_name(), record.id);
        Ok(record)
    }

    /// 写入（覆盖同 id）
    pub fn put(&self, table: SyncTable, record: &PendingRecord) -> Result<()> {
        self.kv.set(table.tree_name(), &record.id, record)
    }

    pub fn get(&self, table: SyncTable, id: &str) -> Result<Option<PendingRecord>> {
        self.kv.get(table.tree_name(), id)
    }

    /// 离线聊天消息
    pub fn queue_chat_message(&self, room: &str, message: &str, metadata: Value) -> Result<PendingRecord> {
        self.enqueue(
            SyncTable::Messages,
            json!({ "room": room, "message": message, "metadata": metadata }),
        )
    }

    /// 离线投票
    pub fn queue_vote(&self, event_id: &str, poll_id: &str, choice: Value) -> Result<PendingRecord> {
        self.enqueue(
            SyncTable::Votes,
            json!({ "eventId": event_id, "pollId": poll_id, "choice": choice }),
        )
    }

    pub fn all(&self, table: SyncTable) -> Result<Vec<PendingRecord>> {
        let mut records: Vec<PendingRecord> = self
            .kv
            .scan_prefix::<PendingRecord>(table.tree_name(), "")?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// 未同步的记录（按创建时间）
    pub fn unsynced(&self, table: SyncTable) -> Result<Vec<PendingRecord>> {
        Ok(self.all(table)?.into_iter().filter(|r| !r.synced).collect())
    }

    /// 标记已同步
    pub fn mark_synced(&self, table: SyncTable, id: &str) -> Result<()> {
        let mut record = self
            .get(table, id)?
            .ok_or_else(|| LightningSDKError::NotFound(format!("待同步记录不存在: {}", id)))?;
        record.synced = true;
        self.put(table, &record)
    }

    /// 清理已同步的记录，返回清理数量
    pub fn purge_synced(&self, table: SyncTable) -> Result<usize> {
        let mut purged = 0;
        for record in self.all(table)?.into_iter().filter(|r| r.synced) {
            if self.kv.delete(table.tree_name(), &record.id)? {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_and_mark_synced() {
        let store = PendingSyncStore::new(KvStore::temporary().unwrap());
        let first = store.queue_chat_message("lobby", "hello", json!({})).unwrap();
        let second = store.queue_chat_message("lobby", "again", json!({})).unwrap();
        store.queue_vote("e1", "p1", json!("a")).unwrap();

        assert_eq!(store.unsynced(SyncTable::Messages).unwrap().len(), 2);
        assert_eq!(store.unsynced(SyncTable::Votes).unwrap().len(), 1);

        store.mark_synced(SyncTable::Messages, &first.id).unwrap();
        let unsynced = store.unsynced(SyncTable::Messages).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, second.id);
        assert_eq!(unsynced[0].payload["message"], "again");
    }

    #[test]
    fn test_mark_unknown_record_fails() {
        let store = PendingSyncStore::new(KvStore::temporary().unwrap());
        assert!(matches!(
            store.mark_synced(SyncTable::Votes, "missing"),
            Err(LightningSDKError::NotFound(_))
        ));
    }

    #[test]
    fn test_purge_synced() {
        let store = PendingSyncStore::new(KvStore::temporary().unwrap());
        let a = store.queue_vote("e1", "p1", json!(1)).unwrap();
        store.queue_vote("e1", "p2", json!(2)).unwrap();
        store.mark_synced(SyncTable::Votes, &a.id).unwrap();

        assert_eq!(store.purge_synced(SyncTable::Votes).unwrap(), 1);
        assert_eq!(store.all(SyncTable::Votes).unwrap().len(), 1);
    }
}
