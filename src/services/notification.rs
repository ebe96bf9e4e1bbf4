use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        notification::{FeedPhase, Notification, NotificationSnapshot},
        query::{Filter, ListQuery},
        realtime::{ChangeEvent, ChangeFilter, ChangeKind},
    },
    services::{auth::SessionHandle, mock::MockDataProvider, store::{ChangeSubscription, RemoteStore}},
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

const NOTIFICATIONS: &str = "notifications";
const DEMO_NOTIFICATION_COUNT: usize = 5;

/// 通知状态的输入
#[derive(Debug, Clone)]
pub enum FeedAction {
    /// 用户出现，开始加载
    Begin { user_id: String, generation: u64 },
    Loaded { generation: u64, notifications: Vec<Notification> },
    /// 加载失败按空列表处理
    LoadFailed { generation: u64 },
    Change(ChangeEvent),
    Live(bool),
    MarkRead(String),
    MarkUnread(String),
    MarkAllRead,
    Remove(String),
    Restore(Notification),
    Reset,
}

/// 通知列表的状态机：Idle → Loading → Ready
///
/// 未读数始终由当前列表计算。加载期间到达的实时事件先缓存，
/// 初次加载完成后按到达顺序重放。
#[derive(Debug, Clone)]
pub struct NotificationState {
    phase: FeedPhase,
    user_id: Option<String>,
    generation: u64,
    notifications: Vec<Notification>,
    pending: Vec<ChangeEvent>,
    live: bool,
}

impl Default for NotificationState {
    fn default() -> Self {
        Self {
            phase: FeedPhase::Idle,
            user_id: None,
            generation: 0,
            notifications: Vec::new(),
            pending: Vec::new(),
            live: false,
        }
    }
}

impl NotificationState {
    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            phase: self.phase,
            user_id: self.user_id.clone(),
            notifications: self.notifications.clone(),
            unread_count: self.unread_count(),
            live: self.live,
        }
    }

    /// 应用一个输入，返回状态是否发生变化
    pub fn apply(&mut self, action: FeedAction) -> bool {
        match action {
            FeedAction::Begin { user_id, generation } => {
                let same_user = self.user_id.as_deref() == Some(user_id.as_str());
                if !same_user {
                    self.notifications.clear();
                }
                self.phase = FeedPhase::Loading;
                self.user_id = Some(user_id);
                self.generation = generation;
                self.pending.clear();
                true
            }
            FeedAction::Loaded { generation, notifications } => {
                if !self.is_current_load(generation) {
                    debug!("Discarding stale notification load (generation {})", generation);
                    return false;
                }
                self.notifications = notifications;
                self.finish_loading();
                true
            }
            FeedAction::LoadFailed { generation } => {
                if !self.is_current_load(generation) {
                    return false;
                }
                self.notifications.clear();
                self.finish_loading();
                true
            }
            FeedAction::Change(event) => match self.phase {
                FeedPhase::Idle => false,
                FeedPhase::Loading => {
                    self.pending.push(event);
                    false
                }
                FeedPhase::Ready => self.apply_change(event),
            },
            FeedAction::Live(live) => {
                let changed = self.live != live;
                self.live = live;
                changed
            }
            FeedAction::MarkRead(id) => self.set_read(&id, true),
            FeedAction::MarkUnread(id) => self.set_read(&id, false),
            FeedAction::MarkAllRead => {
                let mut changed = false;
                for notification in self.notifications.iter_mut().filter(|n| !n.is_read) {
                    notification.is_read = true;
                    changed = true;
                }
                changed
            }
            FeedAction::Remove(id) => {
                let before = self.notifications.len();
                self.notifications.retain(|n| n.id != id);
                before != self.notifications.len()
            }
            FeedAction::Restore(notification) => {
                if self.get(&notification.id).is_some() {
                    return false;
                }
                let position = self
                    .notifications
                    .iter()
                    .position(|n| n.created_at < notification.created_at)
                    .unwrap_or(self.notifications.len());
                self.notifications.insert(position, notification);
                true
            }
            FeedAction::Reset => {
                *self = Self {
                    generation: self.generation,
                    ..Self::default()
                };
                true
            }
        }
    }

    fn is_current_load(&self, generation: u64) -> bool {
        self.phase == FeedPhase::Loading && self.generation == generation
    }

    fn finish_loading(&mut self) {
        self.phase = FeedPhase::Ready;
        for event in std::mem::take(&mut self.pending) {
            self.apply_change(event);
        }
    }

    fn set_read(&mut self, id: &str, read: bool) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) if notification.is_read != read => {
                notification.is_read = read;
                true
            }
            _ => false,
        }
    }

    fn apply_change(&mut self, event: ChangeEvent) -> bool {
        if event.table != NOTIFICATIONS {
            return false;
        }
        match event.kind {
            ChangeKind::Insert => {
                let notification: Notification = match event.new_row() {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!("Ignoring malformed notification insert: {}", e);
                        return false;
                    }
                };
                if self.user_id.as_deref() != Some(notification.user_id.as_str()) {
                    return false;
                }
                // 初次加载与实时推送可能包含同一条
                if self.get(&notification.id).is_some() {
                    debug!("Skipping duplicate notification: {}", notification.id);
                    return false;
                }
                self.notifications.insert(0, notification);
                true
            }
            ChangeKind::Update => {
                let updated: Notification = match event.new_row() {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!("Ignoring malformed notification update: {}", e);
                        return false;
                    }
                };
                match self.notifications.iter_mut().find(|n| n.id == updated.id) {
                    Some(existing) if *existing != updated => {
                        *existing = updated;
                        true
                    }
                    _ => false,
                }
            }
            ChangeKind::Delete => match event.row_id() {
                Some(id) => {
                    let id = id.to_string();
                    self.apply(FeedAction::Remove(id))
                }
                None => false,
            },
        }
    }
}

struct CenterInner {
    config: Config,
    store: Option<Arc<dyn RemoteStore>>,
    mock: MockDataProvider,
    state: Mutex<NotificationState>,
    snapshots: watch::Sender<NotificationSnapshot>,
    generation: AtomicU64,
    epoch: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl CenterInner {
    fn dispatch(&self, action: FeedAction) -> bool {
        let mut state = self.state.lock();
        let changed = state.apply(action);
        if changed {
            self.snapshots.send_replace(state.snapshot());
        }
        changed
    }

    fn abort_listener(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for CenterInner {
    fn drop(&mut self) {
        self.abort_listener();
        if let Some(handle) = self.follower.lock().take() {
            handle.abort();
        }
    }
}

/// 当前用户的通知中心
///
/// 负责初次加载、已读标记与实时推送；`stop()`、用户变化或 drop 时释放订阅。
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<CenterInner>,
}

impl NotificationCenter {
    pub fn new(config: Config, store: Option<Arc<dyn RemoteStore>>) -> Self {
        Self::with_mock(config, store, MockDataProvider::new())
    }

    pub fn with_mock(config: Config, store: Option<Arc<dyn RemoteStore>>, mock: MockDataProvider) -> Self {
        let (snapshots, _) = watch::channel(NotificationSnapshot::default());
        Self {
            inner: Arc::new(CenterInner {
                config,
                store,
                mock,
                state: Mutex::new(NotificationState::default()),
                snapshots,
                generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                listener: Mutex::new(None),
                follower: Mutex::new(None),
            }),
        }
    }

    fn live_store(&self) -> Option<&Arc<dyn RemoteStore>> {
        if self.inner.config.is_configured() {
            self.inner.store.as_ref()
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<NotificationSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.state.lock().unread_count()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.state.lock().notifications().to_vec()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.state.lock().user_id().map(str::to_string)
    }

    /// 为用户开始加载通知并订阅实时变更
    pub async fn start(&self, user_id: &str) {
        self.inner.abort_listener();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.dispatch(FeedAction::Live(false));
        info!("Starting notifications for user: {}", user_id);

        if let Some(store) = self.live_store() {
            let filter = ChangeFilter::table(NOTIFICATIONS).row_eq("user_id", user_id);
            match store.subscribe(filter).await {
                Ok(subscription) => self.spawn_listener(subscription, epoch),
                Err(e) => warn!("Notification feed unavailable for {}: {}", user_id, e),
            }
        }

        self.load(user_id).await;
    }

    /// 重新加载列表，保留实时订阅
    pub async fn refetch(&self) {
        match self.user_id() {
            Some(user_id) => self.load(&user_id).await,
            None => debug!("No user for notification refetch"),
        }
    }

    async fn load(&self, user_id: &str) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.dispatch(FeedAction::Begin {
            user_id: user_id.to_string(),
            generation,
        });

        let store = match self.live_store() {
            Some(store) => store,
            None => {
                let latency = self.inner.config.mock_latency();
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                let notifications = self.inner.mock.generate_notifications(user_id, DEMO_NOTIFICATION_COUNT);
                self.inner.dispatch(FeedAction::Loaded { generation, notifications });
                return;
            }
        };

        let query = ListQuery::new()
            .eq("user_id", user_id)
            .order_by("created_at", false)
            .per_page(self.inner.config.notification_page_size);

        let action = match store.select(NOTIFICATIONS, &query).await {
            Ok(rows) => {
                let notifications = rows
                    .rows
                    .into_iter()
                    .filter_map(|row| match serde_json::from_value::<Notification>(row) {
                        Ok(notification) => Some(notification),
                        Err(e) => {
                            warn!("Skipping malformed notification row: {}", e);
                            None
                        }
                    })
                    .collect();
                FeedAction::Loaded { generation, notifications }
            }
            Err(e) => {
                error!("Error fetching notifications for {}: {}", user_id, e);
                FeedAction::LoadFailed { generation }
            }
        };
        self.inner.dispatch(action);
    }

    fn spawn_listener(&self, mut subscription: ChangeSubscription, epoch: u64) {
        let weak: Weak<CenterInner> = Arc::downgrade(&self.inner);
        self.inner.dispatch(FeedAction::Live(true));

        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.epoch.load(Ordering::SeqCst) != epoch {
                    break;
                }
                debug!("Notification change: {} {:?}", event.kind.as_str(), event.row_id());
                inner.dispatch(FeedAction::Change(event));
            }
            if let Some(inner) = weak.upgrade() {
                if inner.epoch.load(Ordering::SeqCst) == epoch {
                    inner.dispatch(FeedAction::Live(false));
                }
            }
            subscription.stop();
        });
        *self.inner.listener.lock() = Some(handle);
    }

    /// 停止订阅并回到 Idle；进行中的加载结果会被丢弃
    pub fn stop(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.abort_listener();
        if self.inner.dispatch(FeedAction::Reset) {
            debug!("Notifications stopped");
        }
    }

    fn require_user(&self) -> Result<String> {
        self.user_id()
            .ok_or_else(|| AppError::unauthorized("You must be logged in to manage notifications"))
    }

    /// 标记已读；远程更新失败时撤销本地修改
    pub async fn mark_as_read(&self, id: &str) -> Result<()> {
        let user_id = self.require_user()?;
        if self.inner.state.lock().get(id).is_none() {
            return Err(AppError::NotFound(format!("notification {}", id)));
        }
        if !self.inner.dispatch(FeedAction::MarkRead(id.to_string())) {
            return Ok(());
        }

        let store = match self.live_store() {
            Some(store) => store,
            None => return Ok(()),
        };

        let filters = [Filter::eq("id", id), Filter::eq("user_id", user_id.as_str())];
        match store.update(NOTIFICATIONS, &filters, json!({ "is_read": true })).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Error marking notification {} as read: {}", id, e);
                self.inner.dispatch(FeedAction::MarkUnread(id.to_string()));
                Err(e)
            }
        }
    }

    /// 全部标记为已读；远程更新失败时恢复原未读项
    pub async fn mark_all_as_read(&self) -> Result<()> {
        let user_id = self.require_user()?;
        let unread: Vec<String> = self
            .inner
            .state
            .lock()
            .notifications()
            .iter()
            .filter(|n| !n.is_read)
            .map(|n| n.id.clone())
            .collect();
        if unread.is_empty() {
            return Ok(());
        }
        self.inner.dispatch(FeedAction::MarkAllRead);

        let store = match self.live_store() {
            Some(store) => store,
            None => return Ok(()),
        };

        let filters = [Filter::eq("user_id", user_id.as_str()), Filter::eq("is_read", false)];
        match store.update(NOTIFICATIONS, &filters, json!({ "is_read": true })).await {
            Ok(updated) => {
                info!("Marked {} notifications as read for user: {}", updated.len(), user_id);
                Ok(())
            }
            Err(e) => {
                error!("Error marking all notifications as read for {}: {}", user_id, e);
                for id in unread {
                    self.inner.dispatch(FeedAction::MarkUnread(id));
                }
                Err(e)
            }
        }
    }

    /// 删除一条通知；远程删除失败时恢复
    pub async fn delete_notification(&self, id: &str) -> Result<()> {
        let user_id = self.require_user()?;
        let found = self.inner.state.lock().get(id).cloned();
        let removed = match found {
            Some(notification) => notification,
            None => return Ok(()),
        };
        self.inner.dispatch(FeedAction::Remove(id.to_string()));

        let store = match self.live_store() {
            Some(store) => store,
            None => return Ok(()),
        };

        let filters = [Filter::eq("id", id), Filter::eq("user_id", user_id.as_str())];
        match store.delete(NOTIFICATIONS, &filters).await {
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(e) => {
                error!("Error deleting notification {}: {}", id, e);
                self.inner.dispatch(FeedAction::Restore(removed));
                Err(e)
            }
        }
    }

    /// 跟随会话：登录时开始，登出或切换用户时停止
    pub fn follow_session(&self, session: &SessionHandle) {
        let weak = Arc::downgrade(&self.inner);
        let mut changes = session.subscribe();

        let handle = tokio::spawn(async move {
            let mut current: Option<String> = None;
            loop {
                let user_id = changes.borrow_and_update().user().map(|u| u.id.clone());
                if user_id != current {
                    let center = match weak.upgrade() {
                        Some(inner) => NotificationCenter { inner },
                        None => break,
                    };
                    match &user_id {
                        Some(id) => {
                            // 加载或订阅尚未完成时会话又变了：立即停止，再按最新会话处理
                            let interrupted = tokio::select! {
                                _ = center.start(id) => None,
                                changed = changes.changed() => Some(changed.is_ok()),
                            };
                            match interrupted {
                                None => current = Some(id.clone()),
                                Some(open) => {
                                    center.stop();
                                    current = None;
                                    if !open {
                                        break;
                                    }
                                    continue;
                                }
                            }
                        }
                        None => {
                            center.stop();
                            current = None;
                        }
                    }
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.inner.follower.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for NotificationCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("NotificationCenter")
            .field("phase", &state.phase())
            .field("user_id", &state.user_id())
            .field("unread_count", &state.unread_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn row(id: &str, user_id: &str, is_read: bool, created_at: &str) -> Value {
        json!({
            "id": id,
            "user_id": user_id,
            "title": "New collaborator",
            "message": "Someone wants to join your project",
            "type": "project",
            "is_read": is_read,
            "created_at": created_at,
        })
    }

    fn notification(id: &str, is_read: bool, created_at: &str) -> Notification {
        serde_json::from_value(row(id, "u1", is_read, created_at)).unwrap()
    }

    fn ready_state() -> NotificationState {
        let mut state = NotificationState::default();
        state.apply(FeedAction::Begin { user_id: "u1".to_string(), generation: 1 });
        state.apply(FeedAction::Loaded {
            generation: 1,
            notifications: vec![
                notification("n2", false, "2024-03-02T00:00:00Z"),
                notification("n1", true, "2024-03-01T00:00:00Z"),
            ],
        });
        state
    }

    #[test]
    fn test_load_reaches_ready_with_derived_unread() {
        let state = ready_state();
        assert_eq!(state.phase(), FeedPhase::Ready);
        assert_eq!(state.unread_count(), 1);
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let mut state = NotificationState::default();
        state.apply(FeedAction::Begin { user_id: "u1".to_string(), generation: 2 });
        let applied = state.apply(FeedAction::Loaded {
            generation: 1,
            notifications: vec![notification("old", false, "2024-01-01T00:00:00Z")],
        });
        assert!(!applied);
        assert_eq!(state.phase(), FeedPhase::Loading);
        assert!(state.notifications().is_empty());
    }

    #[test]
    fn test_insert_prepends_and_dedupes() {
        let mut state = ready_state();
        let event = ChangeEvent::insert(NOTIFICATIONS, row("n3", "u1", false, "2024-03-03T00:00:00Z"));
        assert!(state.apply(FeedAction::Change(event.clone())));
        assert!(!state.apply(FeedAction::Change(event)));

        let ids: Vec<&str> = state.notifications().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n3", "n2", "n1"]);
        assert_eq!(state.unread_count(), 2);
    }

    #[test]
    fn test_insert_for_other_user_is_ignored() {
        let mut state = ready_state();
        let event = ChangeEvent::insert(NOTIFICATIONS, row("x", "u2", false, "2024-03-03T00:00:00Z"));
        assert!(!state.apply(FeedAction::Change(event)));
        assert_eq!(state.notifications().len(), 2);
    }

    #[test]
    fn test_update_and_delete_recompute_unread() {
        let mut state = ready_state();
        let update = ChangeEvent::update(
            NOTIFICATIONS,
            row("n2", "u1", false, "2024-03-02T00:00:00Z"),
            row("n2", "u1", true, "2024-03-02T00:00:00Z"),
        );
        state.apply(FeedAction::Change(update));
        assert_eq!(state.unread_count(), 0);

        let delete = ChangeEvent::delete(NOTIFICATIONS, json!({"id": "n1"}));
        state.apply(FeedAction::Change(delete));
        assert_eq!(state.notifications().len(), 1);
    }

    #[test]
    fn test_events_while_loading_are_replayed() {
        let mut state = NotificationState::default();
        state.apply(FeedAction::Begin { user_id: "u1".to_string(), generation: 1 });
        let early = ChangeEvent::insert(NOTIFICATIONS, row("n9", "u1", false, "2024-03-09T00:00:00Z"));
        state.apply(FeedAction::Change(early));
        assert!(state.notifications().is_empty());

        state.apply(FeedAction::Loaded {
            generation: 1,
            notifications: vec![notification("n9", false, "2024-03-09T00:00:00Z")],
        });
        assert_eq!(state.notifications().len(), 1);
        assert_eq!(state.unread_count(), 1);
    }

    #[test]
    fn test_restore_keeps_recency_order() {
        let mut state = ready_state();
        let removed = state.get("n2").cloned().unwrap();
        state.apply(FeedAction::Remove("n2".to_string()));
        state.apply(FeedAction::Restore(removed));
        assert_eq!(state.notifications()[0].id, "n2");
    }

    #[tokio::test]
    async fn test_demo_center_marks_locally() {
        let center = NotificationCenter::new(Config::unconfigured(), None);
        center.start("u1").await;

        let snapshot = center.snapshot();
        assert_eq!(snapshot.phase, FeedPhase::Ready);
        assert_eq!(snapshot.unread_count, 2);
        assert!(!snapshot.live);

        center.mark_all_as_read().await.unwrap();
        assert_eq!(center.unread_count(), 0);

        center.stop();
        assert_eq!(center.snapshot().phase, FeedPhase::Idle);
    }
}
