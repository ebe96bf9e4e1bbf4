use crate::{
    error::{AppError, Result},
    models::{
        query::{Filter, ListQuery, Rows},
        realtime::{ChangeEvent, ChangeFilter},
    },
    services::store::{ChangeSubscription, RemoteStore},
    utils::{matcher, validation::validate_identifier},
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// 进程内的表存储
///
/// 行为与托管后端一致：插入时补全 `id` / `created_at`，
/// 强制唯一约束（书签元组），并向订阅者广播行级变更。
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<DashMap<String, Vec<Value>>>,
    unique: Arc<DashMap<String, Vec<Vec<String>>>>,
    changes: broadcast::Sender<ChangeEvent>,
    offline: Arc<AtomicBool>,
    failing_writes: Arc<AtomicBool>,
    select_delay_ms: Arc<AtomicU64>,
    select_calls: Arc<AtomicUsize>,
    write_calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(1024);
        let store = Self {
            tables: Arc::new(DashMap::new()),
            unique: Arc::new(DashMap::new()),
            changes,
            offline: Arc::new(AtomicBool::new(false)),
            failing_writes: Arc::new(AtomicBool::new(false)),
            select_delay_ms: Arc::new(AtomicU64::new(0)),
            select_calls: Arc::new(AtomicUsize::new(0)),
            write_calls: Arc::new(AtomicUsize::new(0)),
        };
        store.add_unique("bookmarks", &["user_id", "item_id", "item_type"]);
        store.add_unique("profiles", &["id"]);
        store
    }

    /// 声明唯一约束
    pub fn add_unique(&self, table: &str, columns: &[&str]) {
        self.unique
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
    }

    /// 直接写入行，不触发变更事件
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.get(table).map(|rows| rows.clone()).unwrap_or_default()
    }

    pub fn count(&self, table: &str) -> usize {
        self.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// 模拟后端不可达：所有操作返回 `DataUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 只让写操作失败，读操作照常
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    /// 模拟慢查询：每次读取前等待指定时长
    pub fn set_select_delay(&self, delay: Duration) {
        self.select_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// 模拟服务端产生的变更（例如后端触发器创建的通知）
    pub fn emit(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::unavailable("memory store is offline"));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_online()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(AppError::unavailable("memory store rejected the write"));
        }
        Ok(())
    }

    fn violates_unique(&self, table: &str, rows: &[Value], candidate: &Value, skip: Option<usize>) -> Option<String> {
        let id = candidate.get("id");
        if id.is_some() {
            let duplicate_id = rows
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip && row.get("id") == id);
            if duplicate_id {
                return Some("id".to_string());
            }
        }

        let constraints = self.unique.get(table)?;
        constraints
            .iter()
            .find(|columns| {
                rows.iter().enumerate().any(|(i, row)| {
                    Some(i) != skip
                        && columns
                            .iter()
                            .all(|c| row.get(c).is_some() && row.get(c) == candidate.get(c))
                })
            })
            .map(|columns| columns.join(", "))
    }

    fn insert_row(&self, table: &str, row: Value) -> Result<Value> {
        let row = Value::Object(Self::prepare_row(row)?);

        {
            let mut rows = self.tables.entry(table.to_string()).or_default();
            if let Some(columns) = self.violates_unique(table, &rows, &row, None) {
                return Err(AppError::Conflict(format!(
                    "duplicate key value violates unique constraint on {} ({})",
                    table, columns
                )));
            }
            rows.push(row.clone());
        }

        debug!("Inserted row into memory table: {}", table);
        self.emit(ChangeEvent::insert(table, row.clone()));
        Ok(row)
    }

    fn prepare_row(row: Value) -> Result<Map<String, Value>> {
        let mut object = match row {
            Value::Object(map) => map,
            _ => return Err(AppError::validation("row must be a JSON object")),
        };
        if !object.get("id").map(|v| v.is_string() || v.is_number()).unwrap_or(false) {
            object.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        if object.get("created_at").map(Value::is_null).unwrap_or(true) {
            object.insert("created_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        Ok(object)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, table: &str, query: &ListQuery) -> Result<Rows> {
        validate_identifier(table)?;
        let delay = self.select_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_online()?;
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(matcher::apply(self.rows(table), query))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        validate_identifier(table)?;
        self.check_writable()?;
        self.insert_row(table, row)
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value> {
        validate_identifier(table)?;
        self.check_writable()?;
        let columns: Vec<&str> = on_conflict.split(',').map(str::trim).collect();

        let existing = {
            let mut rows = self.tables.entry(table.to_string()).or_default();
            let position = rows.iter().position(|r| {
                columns.iter().all(|c| r.get(*c).is_some() && r.get(*c) == row.get(*c))
            });
            match position {
                Some(index) => {
                    let old = rows[index].clone();
                    merge(&mut rows[index], &row);
                    Some((old, rows[index].clone()))
                }
                None => None,
            }
        };

        match existing {
            Some((old, new)) => {
                self.emit(ChangeEvent::update(table, old, new.clone()));
                Ok(new)
            }
            None => self.insert_row(table, row),
        }
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        validate_identifier(table)?;
        self.check_writable()?;
        if !patch.is_object() {
            return Err(AppError::validation("patch must be a JSON object"));
        }

        // 先在副本上合并并检查全部约束，全部通过后才提交
        let mut changed = Vec::new();
        if let Some(mut rows) = self.tables.get_mut(table) {
            let matched: Vec<usize> = (0..rows.len())
                .filter(|&index| matcher::matches_all(&rows[index], filters))
                .collect();
            let mut next = rows.clone();
            for &index in &matched {
                merge(&mut next[index], &patch);
            }
            for &index in &matched {
                if let Some(columns) = self.violates_unique(table, &next, &next[index], Some(index)) {
                    return Err(AppError::Conflict(format!(
                        "duplicate key value violates unique constraint on {} ({})",
                        table, columns
                    )));
                }
            }
            for &index in &matched {
                changed.push((rows[index].clone(), next[index].clone()));
            }
            *rows = next;
        }

        for (old, new) in &changed {
            self.emit(ChangeEvent::update(table, old.clone(), new.clone()));
        }
        Ok(changed.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        validate_identifier(table)?;
        self.check_writable()?;

        let mut removed = Vec::new();
        if let Some(mut rows) = self.tables.get_mut(table) {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows.drain(..) {
                if matcher::matches_all(&row, filters) {
                    removed.push(row);
                } else {
                    kept.push(row);
                }
            }
            *rows = kept;
        }

        for row in &removed {
            self.emit(ChangeEvent::delete(table, row.clone()));
        }
        Ok(removed)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        validate_identifier(&filter.table)?;
        self.check_online()?;

        let (subscription, tx, mut stop_rx) = ChangeSubscription::channel_pair(filter.channel_name());
        let mut changes = self.changes.subscribe();
        let channel = filter.channel_name();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    received = changes.recv() => match received {
                        Ok(event) => {
                            if filter.matches(&event) && tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Memory change feed lagged on {}: {} events skipped", channel, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Memory change feed closed: {}", channel);
        });

        Ok(subscription)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::realtime::ChangeKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_fills_id_and_timestamp() {
        let store = MemoryStore::new();
        let row = store.insert("projects", json!({"title": "Study Buddy"})).await.unwrap();
        assert!(row["id"].as_str().map(|id| !id.is_empty()).unwrap_or(false));
        assert!(row["created_at"].is_string());
        assert_eq!(store.count("projects"), 1);
    }

    #[tokio::test]
    async fn test_bookmark_tuple_is_unique() {
        let store = MemoryStore::new();
        let bookmark = json!({"user_id": "u1", "item_id": "p1", "item_type": "project"});
        store.insert("bookmarks", bookmark.clone()).await.unwrap();

        let err = store.insert("bookmarks", bookmark).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.count("bookmarks"), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_return_affected_rows() {
        let store = MemoryStore::new();
        store.seed("gigs", vec![json!({"id": "g1", "title": "Logo design"})]);

        let updated = store
            .update("gigs", &[Filter::eq("id", "g1")], json!({"title": "Brand kit"}))
            .await
            .unwrap();
        assert_eq!(updated[0]["title"], "Brand kit");

        let missing = store.update("gigs", &[Filter::eq("id", "nope")], json!({"title": "x"})).await.unwrap();
        assert!(missing.is_empty());

        let removed = store.delete("gigs", &[Filter::eq("id", "g1")]).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.count("gigs"), 0);
    }

    #[tokio::test]
    async fn test_conflicting_update_changes_nothing() {
        let store = MemoryStore::new();
        store.seed(
            "bookmarks",
            vec![
                json!({"id": "b1", "user_id": "u1", "item_id": "p1", "item_type": "project"}),
                json!({"id": "b2", "user_id": "u1", "item_id": "p2", "item_type": "project"}),
            ],
        );
        let before = store.rows("bookmarks");
        let mut changes = store.changes.subscribe();

        let err = store
            .update("bookmarks", &[Filter::eq("user_id", "u1")], json!({"item_id": "p9"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.rows("bookmarks"), before);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_receives_scoped_changes() {
        let store = MemoryStore::new();
        let mut sub = store
            .subscribe(ChangeFilter::table("notifications").row_eq("user_id", "u1"))
            .await
            .unwrap();

        store.insert("notifications", json!({"user_id": "u2", "title": "not mine"})).await.unwrap();
        store.insert("notifications", json!({"user_id": "u1", "title": "mine"})).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.unwrap()["title"], "mine");
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.select("projects", &ListQuery::new()).await.unwrap_err();
        assert!(matches!(err, AppError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_column() {
        let store = MemoryStore::new();
        store.upsert("profiles", json!({"id": "u1", "github_url": "https://github.com/a"}), "id").await.unwrap();
        let merged = store
            .upsert("profiles", json!({"id": "u1", "linkedin_url": "https://linkedin.com/in/a"}), "id")
            .await
            .unwrap();
        assert_eq!(merged["github_url"], "https://github.com/a");
        assert_eq!(store.count("profiles"), 1);
    }
}
