pub mod cache;
pub mod matcher;
pub mod serde_helpers;
pub mod validation;

pub use cache::Cache;
