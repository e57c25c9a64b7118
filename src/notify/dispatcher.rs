use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DispatchReport, NotificationDispatcher, NotifyError};
use crate::config::NotificationConfig;
use crate::directory::UserRef;
use crate::observability::workflow_metrics;

/// Sends one message to one device token.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn deliver(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Transport that only records deliveries in the log. Used when no push
/// provider is wired in (CLI runs, local setups).
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl PushTransport for LoggingTransport {
    async fn deliver(&self, token: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        info!(token = %token, title = %title, body = %body, "Push notification");
        Ok(())
    }
}

/// Rate-limited, best-effort push dispatcher.
pub struct PushDispatcher<T: PushTransport> {
    transport: T,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    enabled: bool,
}

impl<T: PushTransport> PushDispatcher<T> {
    pub fn new(transport: T, config: &NotificationConfig) -> Self {
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            transport,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            enabled: config.enabled,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[async_trait]
impl<T: PushTransport> NotificationDispatcher for PushDispatcher<T> {
    async fn send(&self, recipients: &[UserRef], title: &str, body: &str) -> Result<DispatchReport, NotifyError> {
        // One delivery per distinct token, even if a user shows up twice.
        let tokens: BTreeSet<&str> = recipients
            .iter()
            .filter_map(|user| user.fcm_token.as_deref())
            .filter(|token| !token.trim().is_empty())
            .collect();
        let with_token = recipients
            .iter()
            .filter(|u| u.fcm_token.as_deref().is_some_and(|t| !t.trim().is_empty()))
            .count();

        let mut report = DispatchReport {
            skipped_without_token: recipients.len() - with_token,
            ..DispatchReport::default()
        };

        if tokens.is_empty() || !self.enabled {
            debug!(
                recipients = recipients.len(),
                enabled = self.enabled,
                "No deliverable recipients, skipping notification"
            );
            return Ok(report);
        }

        for token in tokens {
            self.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                .await;

            report.attempted += 1;
            match self.transport.deliver(token, title, body).await {
                Ok(()) => {
                    report.delivered += 1;
                    workflow_metrics().record_notification_sent();
                }
                Err(e) => {
                    report.failed += 1;
                    workflow_metrics().record_notification_failure();
                    warn!(error = %e, title = %title, "Push delivery failed");
                }
            }
        }

        if report.delivered == 0 {
            return Err(NotifyError::AllDeliveriesFailed {
                attempted: report.attempted,
            });
        }
        Ok(report)
    }
}
