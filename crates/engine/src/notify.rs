use async_trait::async_trait;
use skillevo_core::{Result, TransitionEvent};
use tracing::{info, warn};

/// Outbound boundary for proposal lifecycle announcements. Implementations
/// deliver to whatever channel the operator wires up; delivery failure never
/// affects the transition that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TransitionEvent) -> Result<()>;
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TransitionEvent) -> Result<()> {
        info!(
            proposal_id = %event.proposal_id,
            skill = %event.skill,
            status = %event.kind,
            level = %event.change_level,
            "Proposal transition"
        );
        Ok(())
    }
}

/// Fire-and-forget delivery wrapper used by the service after every
/// transition it records.
pub async fn deliver(notifier: &dyn Notifier, event: &TransitionEvent) {
    if let Err(e) = notifier.notify(event).await {
        warn!(
            proposal_id = %event.proposal_id,
            error = %e,
            "Notification delivery failed"
        );
    }
}
