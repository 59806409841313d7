//! Delivery hook for newly created alerts

use async_trait::async_trait;
use tracing::info;

use crate::Result;
use crate::models::MatchAlert;

/// Receives each new alert once it has been committed to the alert store.
///
/// Calls are fire-and-forget: a failure is logged by the matcher and never
/// rolls the alert back.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &MatchAlert) -> Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &MatchAlert) -> Result<()> {
        info!(
            "New match for profile {}: {} ({}) scored {:.1}",
            alert.company_profile_id,
            alert.opportunity_title,
            alert.opportunity_id,
            alert.score * 100.0
        );
        Ok(())
    }
}
