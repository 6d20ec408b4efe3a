use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::types::Escalation;
use crate::errors::Result;
use crate::notify::NotificationChannel;

/// Delivers escalations to a human operator
pub struct EscalationNotifier {
    channel: Arc<dyn NotificationChannel>,
    operator: String,
}

impl EscalationNotifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, operator: impl Into<String>) -> Self {
        Self {
            channel,
            operator: operator.into(),
        }
    }

    pub fn message_for(escalation: &Escalation) -> String {
        format!(
            "Escalation: {} needs attention after {} recovery attempts ({}: {}). {}",
            escalation.employee,
            escalation.attempts,
            escalation.anomaly.kind,
            escalation.anomaly.evidence,
            escalation.reason
        )
    }

    pub async fn deliver(&self, escalation: &Escalation) -> Result<()> {
        self.channel
            .send(&Self::message_for(escalation), Some(self.operator.clone()))
            .await?;
        info!(
            employee = %escalation.employee,
            operator = %self.operator,
            "Escalation delivered"
        );
        Ok(())
    }

    /// Deliver escalations until every sender is dropped
    pub async fn run(self, mut escalations: mpsc::UnboundedReceiver<Escalation>) {
        while let Some(escalation) = escalations.recv().await {
            if let Err(e) = self.deliver(&escalation).await {
                error!(
                    employee = %escalation.employee,
                    error = %e,
                    "Failed to deliver escalation"
                );
            }
        }
    }
}
