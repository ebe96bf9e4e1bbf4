use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Remote store configuration
    pub store_url: Option<String>,
    pub store_anon_key: Option<String>,

    // Runtime
    pub environment: String,
    pub log_level: String,

    // Listing defaults
    pub default_per_page: u32,
    pub notification_page_size: u32,
    pub list_stale_secs: u64,

    // Demo mode
    pub mock_dataset_size: usize,
    pub mock_latency_ms: u64,

    // Network
    pub request_timeout_secs: u64,
    pub realtime_heartbeat_secs: u64,

    // Auth
    pub auth_redirect_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            store_url: first_present(&["SUPABASE_URL", "VITE_SUPABASE_URL"]),
            store_anon_key: first_present(&["SUPABASE_ANON_KEY", "VITE_SUPABASE_ANON_KEY"]),

            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "nextup_data=debug".to_string()),

            default_per_page: env::var("DEFAULT_PER_PAGE")
                .unwrap_or_else(|_| "12".to_string())
                .parse()?,
            notification_page_size: env::var("NOTIFICATION_PAGE_SIZE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            list_stale_secs: env::var("LIST_STALE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            mock_dataset_size: env::var("MOCK_DATASET_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            mock_latency_ms: env::var("MOCK_LATENCY_MS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            realtime_heartbeat_secs: env::var("REALTIME_HEARTBEAT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            auth_redirect_url: env::var("AUTH_REDIRECT_URL").ok(),
        })
    }

    /// 无远程存储凭据的配置（演示模式），不读取环境变量
    pub fn unconfigured() -> Self {
        Config {
            store_url: None,
            store_anon_key: None,
            environment: "development".to_string(),
            log_level: "nextup_data=debug".to_string(),
            default_per_page: 12,
            notification_page_size: 20,
            list_stale_secs: 300,
            mock_dataset_size: 10,
            mock_latency_ms: 0,
            request_timeout_secs: 15,
            realtime_heartbeat_secs: 30,
            auth_redirect_url: None,
        }
    }

    pub fn with_store(url: &str, anon_key: &str) -> Self {
        Config {
            store_url: Some(url.to_string()),
            store_anon_key: Some(anon_key.to_string()),
            ..Self::unconfigured()
        }
    }

    /// 存储地址与 API key 均已填写（非空白）
    pub fn is_configured(&self) -> bool {
        non_blank(&self.store_url) && non_blank(&self.store_anon_key)
    }

    pub fn demo_banner(&self) -> Option<&'static str> {
        if self.is_configured() {
            None
        } else {
            Some("Running with demo data. Set SUPABASE_URL and SUPABASE_ANON_KEY for full functionality.")
        }
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn list_stale_time(&self) -> Duration {
        Duration::from_secs(self.list_stale_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn realtime_heartbeat(&self) -> Duration {
        Duration::from_secs(self.realtime_heartbeat_secs.max(1))
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

fn first_present(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_is_demo_mode() {
        let config = Config::unconfigured();
        assert!(!config.is_configured());
        assert!(config.demo_banner().is_some());
    }

    #[test]
    fn test_configured_requires_both_values() {
        assert!(Config::with_store("https://demo.supabase.co", "anon").is_configured());
        assert!(!Config::with_store("https://demo.supabase.co", "").is_configured());
        assert!(!Config::with_store("   ", "anon").is_configured());

        let mut config = Config::with_store("https://demo.supabase.co", "anon");
        config.store_anon_key = None;
        assert!(!config.is_configured());
    }

    #[test]
    fn test_request_timeout_zero_disables() {
        let mut config = Config::unconfigured();
        config.request_timeout_secs = 0;
        assert!(config.request_timeout().is_none());
    }
}
