//! Seam between the dashboard and whichever service holds the LED key.

use async_trait::async_trait;

use crate::error::RemoteError;

/// One push from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Current value of the key; `None` when the key does not exist.
    Value(Option<serde_json::Value>),
    /// The subscription failed. The backend keeps retrying on its own.
    Error(String),
}

/// Write side of the remote key.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait RemoteWriter: Send + Sync {
    /// Upsert the key with a literal string value.
    async fn set(&self, value: &str) -> Result<(), RemoteError>;
}
