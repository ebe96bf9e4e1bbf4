use nextup_data::{
    config::Config,
    models::{
        notification::FeedPhase,
        realtime::ChangeEvent,
    },
    services::{
        auth::SessionHandle,
        memory::MemoryStore,
        notification::NotificationCenter,
        store::RemoteStore,
    },
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;

fn notification(id: &str, user_id: &str, is_read: bool, created_at: &str) -> Value {
    json!({
        "id": id,
        "user_id": user_id,
        "title": format!("Notification {}", id),
        "message": "You have a new collaboration request",
        "type": "project",
        "is_read": is_read,
        "created_at": created_at,
    })
}

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "notifications",
        vec![
            notification("n1", "u1", true, "2024-03-01T08:00:00Z"),
            notification("n2", "u1", false, "2024-03-02T08:00:00Z"),
            notification("n3", "u1", false, "2024-03-03T08:00:00Z"),
            notification("other", "u2", false, "2024-03-04T08:00:00Z"),
        ],
    );
    store
}

fn center_for(store: &Arc<MemoryStore>) -> NotificationCenter {
    NotificationCenter::new(
        Config::with_store("http://localhost:54321", "anon-key"),
        Some(store.clone() as Arc<dyn RemoteStore>),
    )
}

fn ids(center: &NotificationCenter) -> Vec<String> {
    center.notifications().into_iter().map(|n| n.id).collect()
}

/// 等待快照满足条件
async fn wait_for(center: &NotificationCenter, predicate: impl Fn(&NotificationCenter) -> bool) {
    let mut updates = center.subscribe_snapshots();
    let waited = timeout(Duration::from_secs(2), async {
        while !predicate(center) {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for notification state");
}

#[tokio::test]
async fn initial_load_is_newest_first_with_derived_unread() {
    let store = seeded_store();
    let center = center_for(&store);
    assert_eq!(center.snapshot().phase, FeedPhase::Idle);

    center.start("u1").await;
    let snapshot = center.snapshot();

    assert_eq!(snapshot.phase, FeedPhase::Ready);
    assert_eq!(ids(&center), vec!["n3", "n2", "n1"]);
    assert_eq!(snapshot.unread_count, 2);
    assert!(snapshot.live);
}

#[tokio::test]
async fn live_insert_is_prepended_once() {
    let store = seeded_store();
    let center = center_for(&store);
    center.start("u1").await;

    store.emit(ChangeEvent::insert(
        "notifications",
        notification("n4", "u1", false, "2024-03-05T08:00:00Z"),
    ));
    wait_for(&center, |c| c.unread_count() == 3).await;

    assert_eq!(ids(&center), vec!["n4", "n3", "n2", "n1"]);

    // 其他用户的通知不会出现
    store.emit(ChangeEvent::insert(
        "notifications",
        notification("n5", "u2", false, "2024-03-06T08:00:00Z"),
    ));
    store.emit(ChangeEvent::insert(
        "notifications",
        notification("n4", "u1", false, "2024-03-05T08:00:00Z"),
    ));
    store.emit(ChangeEvent::insert(
        "notifications",
        notification("n6", "u1", false, "2024-03-07T08:00:00Z"),
    ));
    wait_for(&center, |c| c.unread_count() == 4).await;
    assert_eq!(ids(&center), vec!["n6", "n4", "n3", "n2", "n1"]);
}

#[tokio::test]
async fn unread_count_tracks_every_change() {
    let store = seeded_store();
    let center = center_for(&store);
    center.start("u1").await;

    center.mark_as_read("n2").await.unwrap();
    assert_eq!(center.unread_count(), 1);
    assert_eq!(store.rows("notifications").iter().filter(|r| r["is_read"] == false).count(), 2);

    store.emit(ChangeEvent::update(
        "notifications",
        notification("n1", "u1", true, "2024-03-01T08:00:00Z"),
        notification("n1", "u1", false, "2024-03-01T08:00:00Z"),
    ));
    wait_for(&center, |c| c.unread_count() == 2).await;

    store.emit(ChangeEvent::delete("notifications", json!({"id": "n3", "user_id": "u1"})));
    wait_for(&center, |c| c.notifications().len() == 2).await;
    assert_eq!(center.unread_count(), 1);

    center.mark_all_as_read().await.unwrap();
    wait_for(&center, |c| c.unread_count() == 0).await;
    let snapshot = center.snapshot();
    assert_eq!(
        snapshot.unread_count,
        snapshot.notifications.iter().filter(|n| !n.is_read).count()
    );
}

#[tokio::test]
async fn failed_mark_as_read_is_rolled_back() {
    let store = seeded_store();
    let center = center_for(&store);
    center.start("u1").await;

    store.set_failing_writes(true);
    assert!(center.mark_as_read("n3").await.is_err());
    assert_eq!(center.unread_count(), 2);
    assert!(center.notifications().iter().any(|n| n.id == "n3" && !n.is_read));

    assert!(center.mark_all_as_read().await.is_err());
    assert_eq!(center.unread_count(), 2);
}

#[tokio::test]
async fn failed_load_is_ready_and_empty() {
    let store = seeded_store();
    store.set_offline(true);
    let center = center_for(&store);
    center.start("u1").await;

    let snapshot = center.snapshot();
    assert_eq!(snapshot.phase, FeedPhase::Ready);
    assert!(snapshot.notifications.is_empty());
    assert_eq!(snapshot.unread_count, 0);
    assert!(!snapshot.live);
}

#[tokio::test]
async fn delete_notification_removes_row() {
    let store = seeded_store();
    let center = center_for(&store);
    center.start("u1").await;

    center.delete_notification("n1").await.unwrap();
    assert_eq!(ids(&center), vec!["n3", "n2"]);
    assert!(store.rows("notifications").iter().all(|r| r["id"] != "n1"));

    center.refetch().await;
    assert_eq!(ids(&center), vec!["n3", "n2"]);
}

#[tokio::test]
async fn stop_releases_the_feed() {
    let store = seeded_store();
    let center = center_for(&store);
    center.start("u1").await;
    center.stop();

    let snapshot = center.snapshot();
    assert_eq!(snapshot.phase, FeedPhase::Idle);
    assert!(snapshot.notifications.is_empty());
    assert!(!snapshot.live);

    store.emit(ChangeEvent::insert(
        "notifications",
        notification("late", "u1", false, "2024-03-09T08:00:00Z"),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(center.notifications().is_empty());
}

#[tokio::test]
async fn center_follows_the_session() {
    let store = seeded_store();
    let center = center_for(&store);
    let session = SessionHandle::anonymous();
    center.follow_session(&session);

    session.set(SessionHandle::signed_in("u1").state());
    wait_for(&center, |c| c.snapshot().phase == FeedPhase::Ready).await;
    assert_eq!(center.user_id().as_deref(), Some("u1"));
    assert_eq!(center.unread_count(), 2);

    session.set(SessionHandle::anonymous().state());
    wait_for(&center, |c| c.snapshot().phase == FeedPhase::Idle).await;
    assert!(center.notifications().is_empty());
}

#[tokio::test]
async fn demo_mode_serves_sample_notifications() {
    let center = NotificationCenter::new(Config::unconfigured(), None);
    center.start("demo-user").await;

    let snapshot = center.snapshot();
    assert_eq!(snapshot.phase, FeedPhase::Ready);
    assert!(!snapshot.notifications.is_empty());
    assert_eq!(
        snapshot.unread_count,
        snapshot.notifications.iter().filter(|n| !n.is_read).count()
    );
    assert!(snapshot.notifications.iter().all(|n| n.user_id == "demo-user"));
}

#[tokio::test]
async fn sign_out_during_initial_load_stops_the_feed() {
    let store = seeded_store();
    store.set_select_delay(Duration::from_millis(1500));
    let center = center_for(&store);
    let session = SessionHandle::anonymous();
    center.follow_session(&session);

    session.set(SessionHandle::signed_in("u1").state());
    wait_for(&center, |c| c.snapshot().phase == FeedPhase::Loading).await;

    session.set(SessionHandle::anonymous().state());
    tokio::time::sleep(Duration::from_millis(150)).await;
    let snapshot = center.snapshot();
    assert_eq!(snapshot.phase, FeedPhase::Idle);
    assert_eq!(center.user_id(), None);
    assert!(!snapshot.live);

    tokio::time::sleep(Duration::from_millis(1600)).await;
    store.emit(ChangeEvent::insert(
        "notifications",
        notification("n7", "u1", false, "2024-03-08T08:00:00Z"),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(center.snapshot().phase, FeedPhase::Idle);
    assert!(center.notifications().is_empty());
}

#[tokio::test]
async fn switching_users_mid_load_follows_the_latest_user() {
    let store = seeded_store();
    store.set_select_delay(Duration::from_millis(300));
    let center = center_for(&store);
    let session = SessionHandle::anonymous();
    center.follow_session(&session);

    session.set(SessionHandle::signed_in("u1").state());
    wait_for(&center, |c| c.snapshot().phase == FeedPhase::Loading).await;
    session.set(SessionHandle::signed_in("u2").state());

    wait_for(&center, |c| {
        c.user_id().as_deref() == Some("u2") && c.snapshot().phase == FeedPhase::Ready
    })
    .await;
    assert_eq!(ids(&center), vec!["other"]);
}
