//! 实时推送客户端

pub mod backoff;
pub mod client;
pub mod credentials;
pub mod subscription;
pub mod transport;
pub mod ws_transport;

pub use backoff::ReconnectBackoff;
pub use client::{ConnectionStatusReport, RealtimeClient};
pub use credentials::{CredentialStore, KvCredentialStore, MemoryCredentialStore};
pub use subscription::{Subscription, SubscriptionKind, SubscriptionSet};
pub use transport::{DisconnectReason, Transport, TransportEvent, TransportEventSink};
pub use ws_transport::WsTransport;
