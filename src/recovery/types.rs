// Recovery ladder records and configuration

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::health::{AnomalyEvent, AnomalyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    Nudge,
    Restart,
    Escalate,
}

impl std::fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryKind::Nudge => f.write_str("nudge"),
            RecoveryKind::Restart => f.write_str("restart"),
            RecoveryKind::Escalate => f.write_str("escalate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Pending,
    Resolved,
    Failed,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryOutcome::Pending => f.write_str("pending"),
            RecoveryOutcome::Resolved => f.write_str("resolved"),
            RecoveryOutcome::Failed => f.write_str("failed"),
        }
    }
}

/// One append-only entry in the recovery log.
///
/// An action is logged as `Pending` when issued; its outcome is appended
/// later as a second entry with the same `attempt_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub employee: String,
    pub action: RecoveryKind,
    pub attempt_number: u32,
    pub outcome: RecoveryOutcome,
    pub anomaly: AnomalyKind,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryAction {
    pub fn is_issue(&self) -> bool {
        self.outcome == RecoveryOutcome::Pending
    }
}

/// Sent to the escalation notifier once automatic recovery gives up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub employee: String,
    pub anomaly: AnomalyEvent,
    pub attempts: u32,
    pub reason: String,
    pub escalated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Failed attempts tolerated before escalating
    pub max_attempts: u32,
    /// Minimum gap between two attempts for one employee
    pub cooldown_secs: u64,
    /// Healthy time after which the ladder starts again from a nudge
    pub ladder_reset_secs: u64,
    /// Notification target for escalations
    pub operator: String,
    pub nudge_message: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_secs: 60,
            ladder_reset_secs: 600,
            operator: "operator".to_string(),
            nudge_message: "please continue working on your task".to_string(),
        }
    }
}

impl RecoveryConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }

    pub fn ladder_reset(&self) -> Duration {
        Duration::seconds(self.ladder_reset_secs as i64)
    }
}
