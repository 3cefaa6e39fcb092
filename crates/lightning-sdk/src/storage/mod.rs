//! 本地持久化
//!
//! 所有持久数据都落在同一个 sled 实例里，按用途拆分 Tree：
//! - `auth`：凭证
//! - `cache::<分区名>`：离线缓存分区
//! - `pending_messages` / `pending_votes`：待后台同步的记录

pub mod kv;

pub use kv::KvStore;

/// 凭证 Tree
pub const AUTH_TREE: &str = "auth";
/// 缓存分区 Tree 前缀
pub const CACHE_TREE_PREFIX: &str = "cache::";
