use crate::{
    config::Config,
    error::Result,
    services::{
        auth::{AuthContext, AuthProvider, GoTrueClient, SessionHandle},
        client::shared_store,
        data::DataService,
        notification::NotificationCenter,
        store::RemoteStore,
    },
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};

static BANNER_SHOWN: AtomicBool = AtomicBool::new(false);

/// 应用程序的共享状态
/// 所有服务共用同一个会话句柄和同一个远程存储句柄
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 当前会话
    pub session: SessionHandle,

    /// 认证上下文
    pub auth: AuthContext,

    /// 数据访问层
    pub data: DataService,

    /// 通知中心
    pub notifications: NotificationCenter,
}

impl AppState {
    /// 按配置组装：已配置时使用进程内共享的远程存储，否则进入演示模式
    pub fn init(config: Config) -> Result<Self> {
        let store = shared_store(&config)?;
        let provider: Option<Arc<dyn AuthProvider>> = if config.is_configured() {
            Some(Arc::new(GoTrueClient::new(&config)?))
        } else {
            None
        };
        Ok(Self::assemble(config, store, provider))
    }

    /// 使用指定的存储实现组装（测试或嵌入场景），不接入认证服务
    pub fn with_store(config: Config, store: Arc<dyn RemoteStore>) -> Self {
        Self::assemble(config, Some(store), None)
    }

    fn assemble(
        config: Config,
        store: Option<Arc<dyn RemoteStore>>,
        provider: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        match config.demo_banner() {
            Some(banner) => {
                if !BANNER_SHOWN.swap(true, Ordering::SeqCst) {
                    warn!("{}", banner);
                }
            }
            None => info!(
                "Using remote store: {}",
                store.as_ref().map(|s| s.name()).unwrap_or("none")
            ),
        }

        // 恢复会话之前保持 Loading
        let session = SessionHandle::loading();
        let auth = AuthContext::new(config.clone(), provider, store.clone(), session.clone());
        let data = DataService::new(config.clone(), store.clone(), session.clone());
        let notifications = NotificationCenter::new(config.clone(), store);

        Self {
            config,
            session,
            auth,
            data,
            notifications,
        }
    }

    /// 是否连接了真实后端
    pub fn is_live(&self) -> bool {
        self.data.is_live()
    }

    /// 通知中心开始跟随会话变化，需要在 Tokio 运行时内调用
    pub fn follow_session(&self) {
        self.notifications.follow_session(&self.session);
    }
}
