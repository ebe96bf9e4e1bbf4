use crate::{
    config::Config,
    error::{AppError, Result},
    services::{rest::RestStore, store::RemoteStore},
};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;

/// 进程内唯一的远程存储句柄
static SHARED_STORE: OnceCell<Arc<dyn RemoteStore>> = OnceCell::new();

/// 返回共享的远程存储句柄，首次调用时创建；未配置时返回 None
///
/// 句柄只创建一次，之后的调用忽略传入的配置。
pub fn shared_store(config: &Config) -> Result<Option<Arc<dyn RemoteStore>>> {
    if !config.is_configured() {
        return Ok(None);
    }

    let store = SHARED_STORE.get_or_try_init(|| {
        let store = RestStore::new(config)?;
        info!("Remote store client created");
        Ok::<_, AppError>(Arc::new(store) as Arc<dyn RemoteStore>)
    })?;
    Ok(Some(store.clone()))
}
