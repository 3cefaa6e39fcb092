//! 离线缓存与后台同步

pub mod background_sync;
pub mod cache_storage;
pub mod fetcher;
pub mod push;
pub mod request;
pub mod retry_policy;
pub mod strategy;
pub mod sync_queue;
pub mod worker;

pub use background_sync::{BackgroundSync, SyncFailurePolicy, SyncReport, SyncScheduler, SyncTag};
pub use cache_storage::{Cache, CacheStorage};
pub use fetcher::{Fetcher, HttpFetcher};
pub use push::{Notification, NotificationPresenter, PushHandler, PushPayload, TracingNotificationPresenter};
pub use request::{CachedResponse, FetchRequest, RequestDestination, RequestMode};
pub use retry_policy::{RetryPolicy, SyncFailureReason};
pub use strategy::CacheStrategy;
pub use sync_queue::{PendingRecord, PendingSyncStore, SyncTable};
pub use worker::{FetchResponse, OfflineWorker, ResponseSource, WorkerMessage, WorkerState};
