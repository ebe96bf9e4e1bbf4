use crate::{
    error::{AppError, Result},
    models::realtime::{ChangeEvent, ChangeFilter},
    services::store::ChangeSubscription,
};
use futures::{sink::SinkExt, stream::StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 实时频道的线路消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    pub fn new(topic: &str, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    /// 加入频道：声明关注的表与行级过滤
    pub fn join(topic: &str, filter: &ChangeFilter, access_token: Option<&str>, reference: u64) -> Self {
        let changes: Vec<Value> = filter
            .events
            .iter()
            .map(|kind| {
                let mut binding = json!({
                    "event": kind.as_str(),
                    "schema": "public",
                    "table": filter.table,
                });
                if let Some(row_filter) = filter.row_filter() {
                    binding["filter"] = Value::String(row_filter);
                }
                binding
            })
            .collect();

        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self::new(topic, "phx_join", payload, reference)
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new("phoenix", "heartbeat", json!({}), reference)
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self::new(topic, "phx_leave", json!({}), reference)
    }

    /// 回复状态（`ok` / `error`）
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != "phx_reply" {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    /// 解析 `postgres_changes` 事件
    pub fn change_event(&self) -> Option<ChangeEvent> {
        if self.event != "postgres_changes" {
            return None;
        }
        let data = self.payload.get("data")?.clone();
        match serde_json::from_value(data) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Discarding malformed change payload on {}: {}", self.topic, e);
                None
            }
        }
    }

    fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// 实时变更订阅客户端
///
/// 每个订阅独占一条连接，后台任务负责心跳、事件转发与退出时的 `phx_leave`。
#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Url,
    access_token: Arc<RwLock<Option<String>>>,
    heartbeat: Duration,
    next_ref: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn new(base_url: &Url, api_key: &str, heartbeat: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: Self::endpoint(base_url, api_key)?,
            access_token: Arc::new(RwLock::new(None)),
            heartbeat,
            next_ref: Arc::new(AtomicU64::new(1)),
        })
    }

    /// `https://host` → `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub fn endpoint(base_url: &Url, api_key: &str) -> Result<Url> {
        let mut endpoint = base_url.join("realtime/v1/websocket")?;
        let scheme = match base_url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|_| AppError::Realtime(format!("cannot use scheme {} for realtime", scheme)))?;

        let query = serde_urlencoded::to_string([("apikey", api_key), ("vsn", PROTOCOL_VERSION)])
            .map_err(|e| AppError::Realtime(format!("invalid realtime query: {}", e)))?;
        endpoint.set_query(Some(&query));
        Ok(endpoint)
    }

    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn next_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::SeqCst)
    }

    /// 建立连接并加入频道；加入确认前的任何失败都会关闭连接并返回错误
    pub async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeSubscription> {
        let topic = format!("realtime:{}", filter.channel_name());
        info!("Opening realtime channel: {}", topic);

        let (stream, _) = connect_async(self.endpoint.as_str()).await?;
        let (mut sink, mut source) = stream.split();

        let join_ref = self.next_ref();
        let token = self.access_token.read().clone();
        sink.send(ChannelMessage::join(&topic, &filter, token.as_deref(), join_ref).to_message()?)
            .await?;

        let join_ref_text = join_ref.to_string();
        let joined: Result<()> = timeout(JOIN_TIMEOUT, async {
            while let Some(frame) = source.next().await {
                let text = match frame? {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let message: ChannelMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(_) => continue,
                };
                if message.topic == topic && message.reference.as_deref() == Some(join_ref_text.as_str()) {
                    return match message.reply_status() {
                        Some("ok") => Ok(()),
                        _ => Err(AppError::Realtime(format!(
                            "join rejected for {}: {}",
                            topic, message.payload
                        ))),
                    };
                }
            }
            Err(AppError::Realtime(format!("connection closed while joining {}", topic)))
        })
        .await
        .map_err(|_| AppError::Realtime(format!("timed out joining {}", topic)))?;

        if let Err(e) = joined {
            let _ = sink.close().await;
            return Err(e);
        }

        let (subscription, events, mut stop) = ChangeSubscription::channel_pair(filter.channel_name());
        let client = self.clone();
        let heartbeat_every = self.heartbeat;

        tokio::spawn(async move {
            let mut heartbeat = interval(heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop => {
                        debug!("Leaving realtime channel: {}", topic);
                        if let Ok(leave) = ChannelMessage::leave(&topic, client.next_ref()).to_message() {
                            let _ = sink.send(leave).await;
                        }
                        let _ = sink.close().await;
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let beat = ChannelMessage::heartbeat(client.next_ref()).to_message();
                        match beat {
                            Ok(beat) => {
                                if let Err(e) = sink.send(beat).await {
                                    error!("Realtime heartbeat failed on {}: {}", topic, e);
                                    break;
                                }
                            }
                            Err(e) => error!("Failed to encode heartbeat: {}", e),
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let message: ChannelMessage = match serde_json::from_str(&text) {
                                Ok(message) => message,
                                Err(e) => {
                                    debug!("Ignoring unparseable realtime frame: {}", e);
                                    continue;
                                }
                            };
                            if message.topic != topic {
                                continue;
                            }
                            match message.event.as_str() {
                                "postgres_changes" => {
                                    if let Some(event) = message.change_event() {
                                        if filter.matches(&event) && events.send(event).is_err() {
                                            break;
                                        }
                                    }
                                }
                                "phx_error" | "phx_close" => {
                                    warn!("Realtime channel {} closed by server: {}", topic, message.event);
                                    break;
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Realtime connection closed: {}", topic);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!("Realtime connection error on {}: {}", topic, e);
                            break;
                        }
                    },
                }
            }
        });

        Ok(subscription)
    }
}
