//! 推送通知
//!
//! 推送负载可以是 JSON（`{title, body, icon, badge, url, tag}`），也可以是纯文本正文。
//! 通知带 "view" / "close" 两个动作，"view" 打开或聚焦应用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::OfflineConfig;
use crate::error::Result;

pub const DEFAULT_TITLE: &str = "Lightning Talk Circle";
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";
pub const DEFAULT_VIBRATE: [u32; 3] = [100, 50, 100];

/// 解析后的推送内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub url: Option<String>,
    pub tag: Option<String>,
}

impl PushPayload {
    /// JSON 对象按字段解析，其他内容整体作为正文
    pub fn parse(data: &[u8]) -> Self {
        if let Ok(payload) = serde_json::from_slice::<PushPayload>(data) {
            if data.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
                return payload;
            }
        }
        let text = String::from_utf8_lossy(data).trim().to_string();
        Self {
            body: (!text.is_empty()).then_some(text),
            ..Self::default()
        }
    }
}

/// 通知动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// 展示给用户的通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: Option<String>,
    /// 点击 "view" 时打开的地址
    pub url: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn from_payload(payload: PushPayload, config: &OfflineConfig) -> Self {
        Self {
            title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: payload.body.unwrap_or_default(),
            icon: payload.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
            badge: payload.badge.unwrap_or_else(|| DEFAULT_BADGE.to_string()),
            vibrate: DEFAULT_VIBRATE.to_vec(),
            tag: payload.tag,
            url: payload.url.unwrap_or_else(|| config.root_url.clone()),
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "View".to_string(),
                },
                NotificationAction {
                    action: "close".to_string(),
                    title: "Close".to_string(),
                },
            ],
        }
    }
}

/// 宿主平台的通知能力
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn show_notification(&self, notification: &Notification) -> Result<()>;

    /// 聚焦已打开的应用窗口，没有则新开
    async fn focus_or_open(&self, url: &str) -> Result<()>;
}

/// 只写日志的默认实现
#[derive(Debug, Default)]
pub struct TracingNotificationPresenter;

#[async_trait]
impl NotificationPresenter for TracingNotificationPresenter {
    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        info!("🔔 {}: {}", notification.title, notification.body);
        Ok(())
    }

    async fn focus_or_open(&self, url: &str) -> Result<()> {
        info!("打开应用: {}", url);
        Ok(())
    }
}

/// 推送处理
pub struct PushHandler {
    config: OfflineConfig,
    presenter: Arc<dyn NotificationPresenter>,
}

impl PushHandler {
    pub fn new(config: OfflineConfig, presenter: Arc<dyn NotificationPresenter>) -> Self {
        Self { config, presenter }
    }

    /// 收到推送
    pub async fn handle_push(&self, data: &[u8]) -> Result<Notification> {
        let notification = Notification::from_payload(PushPayload::parse(data), &self.config);
        self.presenter.show_notification(&notification).await?;
        Ok(notification)
    }

    /// 用户点击通知或其动作；返回是否打开了应用
    pub async fn handle_click(&self, notification: &Notification, action: Option<&str>) -> Result<bool> {
        match action {
            Some("view") => {
                self.presenter.focus_or_open(&self.config.root_url).await?;
                Ok(true)
            }
            other => {
                debug!("通知动作 {:?}，不打开应用 ({})", other, notification.title);
                Ok(false)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_helpers::RecordingPresenter;
    use super::*;

    #[test]
    fn test_parse_json_and_text() {
        let payload = PushPayload::parse(br#"{"title":"New poll","body":"Vote now","url":"/polls/1"}"#);
        assert_eq!(payload.title.as_deref(), Some("New poll"));
        assert_eq!(payload.url.as_deref(), Some("/polls/1"));

        let payload = PushPayload::parse(b"Talk starts in 5 minutes");
        assert_eq!(payload.title, None);
        assert_eq!(payload.body.as_deref(), Some("Talk starts in 5 minutes"));

        // JSON 字符串不是对象，按正文处理
        let payload = PushPayload::parse(br#""quoted""#);
        assert_eq!(payload.body.as_deref(), Some("\"quoted\""));
    }

    #[test]
    fn test_notification_defaults() {
        let notification = Notification::from_payload(PushPayload::default(), &OfflineConfig::default());
        assert_eq!(notification.title, DEFAULT_TITLE);
        assert_eq!(notification.icon, "/icons/icon-192x192.png");
        assert_eq!(notification.badge, "/icons/badge-72x72.png");
        assert_eq!(notification.vibrate, vec![100, 50, 100]);
        let actions: Vec<&str> = notification.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["view", "close"]);
    }

    #[tokio::test]
    async fn test_view_opens_root_and_close_does_not() {
        let presenter = Arc::new(RecordingPresenter::default());
        let handler = PushHandler::new(OfflineConfig::default(), presenter.clone());

        let notification = handler.handle_push(b"hello").await.unwrap();
        assert_eq!(presenter.shown.lock().len(), 1);

        assert!(!handler.handle_click(&notification, Some("close")).await.unwrap());
        assert!(presenter.opened.lock().is_empty());

        assert!(handler.handle_click(&notification, Some("view")).await.unwrap());
        assert_eq!(presenter.opened.lock().as_slice(), &["/".to_string()]);
    }
}
