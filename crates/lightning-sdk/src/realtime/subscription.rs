//! 订阅集合
//!
//! 订阅以 (kind, params) 的规范序列化作为身份：结构相同的订阅只保留一份，
//! 每次（重新）连接成功后按键序全部重放。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// 订阅类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Room,
    Poll,
}

/// 一个需要服务端推送的主题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub kind: SubscriptionKind,
    /// BTreeMap 保证参数有序，序列化结果即规范形式
    pub params: BTreeMap<String, String>,
}

impl Subscription {
    /// 房间订阅；metadata 以 JSON 字符串保存
    pub fn room(room: &str, metadata: &Value) -> Self {
        let mut params = BTreeMap::new();
        params.insert("room".to_string(), room.to_string());
        params.insert("metadata".to_string(), metadata.to_string());
        Self {
            kind: SubscriptionKind::Room,
            params,
        }
    }

    pub fn poll(event_id: &str, poll_id: &str) -> Self {
        let mut params = BTreeMap::new();
        params.insert("eventId".to_string(), event_id.to_string());
        params.insert("pollId".to_string(), poll_id.to_string());
        Self {
            kind: SubscriptionKind::Poll,
            params,
        }
    }

    /// 规范键
    pub fn canonical_key(&self) -> String {
        // 只含字符串的结构序列化不会失败
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}:{:?}", self.kind, self.params))
    }

    fn param(&self, name: &str) -> &str {
        self.params.get(name).map(String::as_str).unwrap_or_default()
    }

    /// 订阅时发往服务端的 (事件名, 负载)
    pub fn subscribe_message(&self) -> (&'static str, Value) {
        match self.kind {
            SubscriptionKind::Room => {
                let metadata = serde_json::from_str::<Value>(self.param("metadata"))
                    .unwrap_or_else(|_| json!({}));
                ("join:room", json!({ "room": self.param("room"), "metadata": metadata }))
            }
            SubscriptionKind::Poll => (
                "poll:subscribe",
                json!({ "eventId": self.param("eventId"), "pollId": self.param("pollId") }),
            ),
        }
    }

    /// 退订时发往服务端的 (事件名, 负载)
    pub fn unsubscribe_message(&self) -> (&'static str, Value) {
        match self.kind {
            SubscriptionKind::Room => ("leave:room", json!({ "room": self.param("room") })),
            SubscriptionKind::Poll => (
                "poll:unsubscribe",
                json!({ "eventId": self.param("eventId"), "pollId": self.param("pollId") }),
            ),
        }
    }
}

/// 去重后的订阅集合
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSet {
    entries: BTreeMap<String, Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入订阅；已存在时返回 false
    pub fn insert(&mut self, subscription: Subscription) -> bool {
        let key = subscription.canonical_key();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, subscription);
        true
    }

    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        self.entries.remove(&subscription.canonical_key()).is_some()
    }

    /// 按房间名移除（退订房间时 metadata 未知）
    pub fn remove_room(&mut self, room: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, sub| {
            !(sub.kind == SubscriptionKind::Room && sub.params.get("room").map(String::as_str) == Some(room))
        });
        before - self.entries.len()
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains_key(&subscription.canonical_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }

    /// 全部规范键（用于状态快照）
    pub fn serialized(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_dedup() {
        let mut set = SubscriptionSet::new();
        assert!(set.insert(Subscription::room("lobby", &json!({"role": "viewer"}))));
        assert!(!set.insert(Subscription::room("lobby", &json!({"role": "viewer"}))));
        assert!(set.insert(Subscription::room("lobby", &json!({"role": "speaker"}))));
        assert!(set.insert(Subscription::poll("e1", "p1")));
        assert!(!set.insert(Subscription::poll("e1", "p1")));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_remove_room_ignores_metadata() {
        let mut set = SubscriptionSet::new();
        set.insert(Subscription::room("lobby", &json!({"a": 1})));
        set.insert(Subscription::room("lobby", &json!({"a": 2})));
        set.insert(Subscription::room("stage", &json!({})));
        set.insert(Subscription::poll("e1", "p1"));

        assert_eq!(set.remove_room("lobby"), 2);
        assert_eq!(set.len(), 2);
        assert!(set.remove(&Subscription::poll("e1", "p1")));
        assert!(!set.remove(&Subscription::poll("e1", "p1")));
    }

    #[test]
    fn test_wire_messages() {
        let room = Subscription::room("lobby", &json!({"seat": 3}));
        let (event, payload) = room.subscribe_message();
        assert_eq!(event, "join:room");
        assert_eq!(payload, json!({"room": "lobby", "metadata": {"seat": 3}}));
        assert_eq!(room.unsubscribe_message(), ("leave:room", json!({"room": "lobby"})));

        let poll = Subscription::poll("e1", "p9");
        assert_eq!(
            poll.subscribe_message(),
            ("poll:subscribe", json!({"eventId": "e1", "pollId": "p9"}))
        );
        assert_eq!(poll.unsubscribe_message().0, "poll:unsubscribe");
    }

    #[test]
    fn test_canonical_key_is_stable() {
        let a = Subscription::poll("e1", "p1");
        let b = Subscription::poll("e1", "p1");
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert!(a.canonical_key().contains("\"kind\":\"poll\""));
    }
}
