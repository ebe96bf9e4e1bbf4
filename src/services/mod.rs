pub mod auth;
pub mod client;
pub mod data;
pub mod memory;
pub mod mock;
pub mod notification;
pub mod realtime;
pub mod rest;
pub mod store;

// 重新导出常用类型
pub use auth::{AuthContext, AuthProvider, GoTrueClient, SessionHandle, SignUpOutcome};
pub use client::shared_store;
pub use data::DataService;
pub use memory::MemoryStore;
pub use mock::MockDataProvider;
pub use notification::{FeedAction, NotificationCenter, NotificationState};
pub use realtime::RealtimeClient;
pub use rest::RestStore;
pub use store::{ChangeSubscription, RemoteStore};
