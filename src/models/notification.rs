use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
}

fn default_notification_type() -> String {
    "system".to_string()
}

impl Notification {
    pub fn reference(&self) -> Option<(&str, &str)> {
        match (&self.reference_id, &self.reference_type) {
            (Some(id), Some(kind)) => Some((id.as_str(), kind.as_str())),
            _ => None,
        }
    }
}

/// 通知子系统的生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPhase {
    Idle,
    Loading,
    Ready,
}

/// 发布给界面层的只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationSnapshot {
    pub phase: FeedPhase,
    pub user_id: Option<String>,
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub live: bool,
}

impl Default for NotificationSnapshot {
    fn default() -> Self {
        Self {
            phase: FeedPhase::Idle,
            user_id: None,
            notifications: Vec::new(),
            unread_count: 0,
            live: false,
        }
    }
}
