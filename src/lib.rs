//! NextUP 数据访问层：远程表读写、书签、通知同步与演示数据回退

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;
