use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// 行级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// 变更事件，`record` 为变更后的行，`old_record` 为变更前的行（删除时仅含主键）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub table: String,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn insert(table: &str, record: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table: table.to_string(),
            record: Some(record),
            old_record: None,
            commit_timestamp: Some(Utc::now()),
        }
    }

    pub fn update(table: &str, old_record: Value, record: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            table: table.to_string(),
            record: Some(record),
            old_record: Some(old_record),
            commit_timestamp: Some(Utc::now()),
        }
    }

    pub fn delete(table: &str, old_record: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table: table.to_string(),
            record: None,
            old_record: Some(old_record),
            commit_timestamp: Some(Utc::now()),
        }
    }

    /// 反序列化变更后的行
    pub fn new_row<T: DeserializeOwned>(&self) -> Result<T> {
        let record = self
            .record
            .clone()
            .ok_or_else(|| AppError::Realtime(format!("{} event carries no record", self.kind.as_str())))?;
        Ok(serde_json::from_value(record)?)
    }

    /// 受影响行的主键，优先取变更后的行
    pub fn row_id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .and_then(|r| r.get("id"))
            .or_else(|| self.old_record.as_ref().and_then(|r| r.get("id")))
            .and_then(Value::as_str)
    }
}

/// 变更订阅范围：表 + 行级过滤（`column=eq.value`）+ 关注的事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: String,
    pub column: Option<String>,
    pub value: Option<String>,
    pub events: Vec<ChangeKind>,
}

impl ChangeFilter {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            column: None,
            value: None,
            events: vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete],
        }
    }

    pub fn row_eq(mut self, column: &str, value: &str) -> Self {
        self.column = Some(column.to_string());
        self.value = Some(value.to_string());
        self
    }

    pub fn events(mut self, events: Vec<ChangeKind>) -> Self {
        self.events = events;
        self
    }

    /// 频道名称，同一用户的同一张表只对应一个频道
    pub fn channel_name(&self) -> String {
        match (&self.column, &self.value) {
            (Some(column), Some(value)) => format!("{}:{}={}", self.table, column, value),
            _ => self.table.clone(),
        }
    }

    /// 服务端使用的行过滤表达式
    pub fn row_filter(&self) -> Option<String> {
        match (&self.column, &self.value) {
            (Some(column), Some(value)) => Some(format!("{}=eq.{}", column, value)),
            _ => None,
        }
    }

    /// 事件是否落在订阅范围内
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.events.contains(&event.kind) {
            return false;
        }
        let (column, value) = match (&self.column, &self.value) {
            (Some(column), Some(value)) => (column, value),
            _ => return true,
        };
        let row = event.record.as_ref().or(event.old_record.as_ref());
        match row.and_then(|r| r.get(column)) {
            Some(Value::String(s)) => s == value,
            Some(other) => other.to_string() == *value,
            None => false,
        }
    }
}
