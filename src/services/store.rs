use crate::{
    error::Result,
    models::{
        query::{Filter, ListQuery, Rows},
        realtime::{ChangeEvent, ChangeFilter},
    },
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// 远程表存储的最小接口
///
/// 托管后端（[`RestStore`](crate::services::rest::RestStore)）与进程内存储
/// （[`MemoryStore`](crate::services::memory::MemoryStore)）都实现该接口，
/// 数据访问层与通知子系统只依赖这里列出的操作。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 过滤、排序、分页查询；`Rows::total` 为分页前的匹配数
    async fn select(&self, table: &str, query: &ListQuery) -> Result<Rows>;

    /// 插入单行并返回存储后的行
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// 按 `on_conflict` 列插入或合并
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str) -> Result<Value>;

    /// 合并更新所有匹配行，返回更新后的行
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;

    /// 删除所有匹配行，返回被删除的行
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>>;

    /// 订阅表级变更；订阅在 [`ChangeSubscription::stop`] 或 drop 时释放
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription>;

    /// 登录状态变化时更新请求所带的访问令牌
    fn set_access_token(&self, _token: Option<String>) {}

    fn name(&self) -> &'static str;
}

/// 一个活动的变更订阅
///
/// 事件通过通道传递给持有者；`stop` 与 drop 都会通知后台任务退出。
pub struct ChangeSubscription {
    channel: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl ChangeSubscription {
    pub fn new(
        channel: String,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        stop: oneshot::Sender<()>,
    ) -> Self {
        Self {
            channel,
            events,
            stop: Some(stop),
        }
    }

    /// 创建订阅，并把发送端交给调用方
    pub fn channel_pair(channel: String) -> (Self, mpsc::UnboundedSender<ChangeEvent>, oneshot::Receiver<()>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        (Self::new(channel, event_rx, stop_tx), event_tx, stop_rx)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_active(&self) -> bool {
        self.stop.as_ref().map(|s| !s.is_closed()).unwrap_or(false)
    }

    /// 等待下一个事件；订阅结束后返回 None
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if self.stop.is_none() {
            return None;
        }
        self.events.recv().await
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            debug!("Releasing change subscription: {}", self.channel);
            let _ = stop.send(());
        }
        self.events.close();
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("channel", &self.channel)
            .field("active", &self.stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_flow_until_stopped() {
        let (mut sub, tx, mut stop_rx) = ChangeSubscription::channel_pair("notifications".to_string());
        tx.send(ChangeEvent::insert("notifications", json!({"id": "n1"}))).unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.row_id(), Some("n1"));
        assert!(sub.is_active());

        sub.stop();
        assert!(stop_rx.try_recv().is_ok());
        assert!(tx.send(ChangeEvent::insert("notifications", json!({"id": "n2"}))).is_err());
    }

    #[tokio::test]
    async fn test_drop_signals_stop() {
        let (sub, _tx, stop_rx) = ChangeSubscription::channel_pair("projects".to_string());
        drop(sub);
        assert!(stop_rx.await.is_ok());
    }
}
