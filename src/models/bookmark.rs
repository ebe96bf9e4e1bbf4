use crate::models::record::{Item, ItemType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub item_type: ItemType,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    pub fn new(user_id: &str, item_id: &str, item_type: ItemType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            item_type,
            created_at: Utc::now(),
        }
    }
}

/// 书签及其关联的条目（条目已被删除时为 None）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkWithItem {
    #[serde(flatten)]
    pub bookmark: Bookmark,
    pub item: Option<Item>,
}
