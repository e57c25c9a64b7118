//! Notification fan-out
//!
//! Delivery goes through the [`NotificationDispatcher`] seam. The shipped
//! implementation is [`PushDispatcher`], which rate-limits per-token sends
//! through a [`PushTransport`] (the push provider itself is external).

pub mod dispatcher;

pub use dispatcher::{LoggingTransport, PushDispatcher, PushTransport};

use async_trait::async_trait;
use thiserror::Error;

use crate::directory::UserRef;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Push transport error: {0}")]
    Transport(String),

    #[error("All {attempted} deliveries failed")]
    AllDeliveriesFailed { attempted: usize },
}

/// Ephemeral fan-out payload; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub recipients: Vec<UserRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Recipients dropped because they have no push destination.
    pub skipped_without_token: usize,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver to every recipient with a push token. No deliverable
    /// recipient is a silent no-op.
    async fn send(&self, recipients: &[UserRef], title: &str, body: &str) -> Result<DispatchReport, NotifyError>;
}
