use async_trait::async_trait;

use crate::error::SinkError;

/// A push notification derived from a received message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Destination for notifications.
///
/// Implementations own delivery entirely (authentication, transport,
/// retries). Callers treat failure as non-fatal.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    ///
    /// Deliver a single notification
    ///
    /// # Errors
    /// Whatever prevented delivery; the caller logs it and continues.
    ///
    async fn send(&self, notification: &Notification) -> Result<(), SinkError>;
}
