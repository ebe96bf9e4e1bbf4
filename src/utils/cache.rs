use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 缓存项
#[derive(Debug, Clone)]
struct CacheItem<T> {
    value: T,
    expires_at: Instant,
}

/// 列表结果缓存，键以 `表名:` 开头，写入某张表时按前缀失效
#[derive(Debug, Clone)]
pub struct Cache<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<String, CacheItem<T>>>>,
    default_ttl: Duration,
}

impl<T: Clone + Send + Sync + 'static> Cache<T> {
    /// 创建新的缓存实例；TTL 为 0 时不缓存
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.default_ttl.is_zero()
    }

    /// 设置缓存项，顺带清理已过期的项
    pub fn set(&self, key: String, value: T) {
        if !self.is_enabled() {
            return;
        }
        let now = Instant::now();
        let item = CacheItem {
            value,
            expires_at: now + self.default_ttl,
        };
        let mut data = self.data.write();
        data.retain(|_, item| item.expires_at > now);
        data.insert(key, item);
    }

    /// 获取未过期的缓存项；命中过期项时将其移除
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let data = self.data.read();
            match data.get(key) {
                Some(item) if item.expires_at > now => return Some(item.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut data = self.data.write();
        if data.get(key).map(|item| item.expires_at <= now).unwrap_or(false) {
            data.remove(key);
        }
        None
    }

    /// 使某张表的全部列表缓存失效
    pub fn invalidate_table(&self, table: &str) -> usize {
        let prefix = format!("{}:", table);
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(&prefix));
        before - data.len()
    }

    pub fn size(&self) -> usize {
        self.data.read().len()
    }
}
