use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// 未配置远程存储，进入演示模式
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: {0}")]
    ValidatorError(#[from] validator::ValidationErrors),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// 稳定的错误码，供界面层区分处理
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            AppError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            AppError::Validation(_) | AppError::ValidatorError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::Realtime(_) => "REALTIME_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Request(_) => "REQUEST_ERROR",
            AppError::WebSocket(_) => "WEBSOCKET_ERROR",
            AppError::Url(_) => "URL_ERROR",
        }
    }

    /// 展示给用户的消息（表单提示 / toast）
    pub fn user_message(&self) -> String {
        match self {
            AppError::ConfigurationMissing(_) => {
                "Running in demo mode. Connect a backend for full functionality.".to_string()
            }
            AppError::DataUnavailable(_) => "Failed to load data. Please try again.".to_string(),
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Authentication(msg) => msg.clone(),
            AppError::ValidatorError(e) => {
                let mut messages = e
                    .field_errors()
                    .iter()
                    .flat_map(|(field, errors)| {
                        errors.iter().map(move |err| {
                            err.message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| format!("Invalid value for {}", field))
                        })
                    })
                    .collect::<Vec<_>>();
                messages.sort();
                messages.join("; ")
            }
            AppError::Unauthorized(_) => "Please sign in to continue.".to_string(),
            AppError::Realtime(_) | AppError::WebSocket(_) => {
                "Live updates are temporarily unavailable.".to_string()
            }
            AppError::Internal(_)
            | AppError::Serialization(_)
            | AppError::Request(_)
            | AppError::Url(_) => "An unknown error occurred".to_string(),
        }
    }

    /// 读取失败时界面是否应提供重试按钮
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DataUnavailable(_)
                | AppError::Request(_)
                | AppError::Realtime(_)
                | AppError::WebSocket(_)
        )
    }
}

// 便利函数，用于创建常见错误
impl AppError {
    pub fn not_found(resource: &str) -> Self {
        Self::NotFound(format!("{} not found", resource))
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::Unauthorized(msg.to_string())
    }

    pub fn unavailable(msg: &str) -> Self {
        Self::DataUnavailable(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn conflict(msg: &str) -> Self {
        Self::Conflict(msg.to_string())
    }

    pub fn internal(msg: &str) -> Self {
        Self::Internal(msg.to_string())
    }

    pub fn demo_mode() -> Self {
        Self::ConfigurationMissing(
            "SUPABASE_URL and SUPABASE_ANON_KEY are not set".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::not_found("Project").code(), "NOT_FOUND");
        assert_eq!(AppError::unavailable("down").code(), "DATA_UNAVAILABLE");
        assert_eq!(AppError::demo_mode().code(), "CONFIGURATION_MISSING");
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = AppError::validation("title must be at least 5 characters");
        assert_eq!(err.user_message(), "title must be at least 5 characters");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        assert!(AppError::unavailable("timeout").is_retryable());
        assert!(!AppError::not_found("Gig").is_retryable());
    }
}
