// Anomalies, summaries and monitor configuration

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::worker::WorkerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    StuckState,
    ProgressStagnant,
    ErrorState,
    HelpRequested,
}

impl AnomalyKind {
    /// Help requests are informational and never climb the recovery ladder
    pub fn triggers_recovery(&self) -> bool {
        !matches!(self, AnomalyKind::HelpRequested)
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AnomalyKind::StuckState => "STUCK_STATE",
            AnomalyKind::ProgressStagnant => "PROGRESS_STAGNANT",
            AnomalyKind::ErrorState => "ERROR_STATE",
            AnomalyKind::HelpRequested => "HELP_REQUESTED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub employee: String,
    pub kind: AnomalyKind,
    pub evidence: String,
    pub detected_at: DateTime<Utc>,
}

/// What the monitor tells the recovery manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorSignal {
    Anomaly(AnomalyEvent),
    /// The condition is still active but inside the anomaly cool-down, so no
    /// new event was logged
    Persisting(AnomalyEvent),
    /// A previously anomalous or just restarted agent polled clean
    Healthy { employee: String, at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Running,
    Stuck,
    Restarting,
    Escalated,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            HealthState::Running => "running",
            HealthState::Stuck => "stuck",
            HealthState::Restarting => "restarting",
            HealthState::Escalated => "escalated",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of one monitored agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub employee: String,
    pub state: HealthState,
    pub worker_state: Option<WorkerState>,
    pub overall_percent: f64,
    pub last_activity_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub active_anomalies: Vec<AnomalyKind>,
}

impl AgentHealth {
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Running && self.active_anomalies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub healthy: usize,
    pub stuck: usize,
    pub error: usize,
    pub restarting: usize,
    pub escalated: usize,
    pub agents: Vec<AgentHealth>,
}

impl HealthSummary {
    pub fn from_agents(generated_at: DateTime<Utc>, agents: Vec<AgentHealth>) -> Self {
        let error = count(&agents, |a| a.active_anomalies.contains(&AnomalyKind::ErrorState));
        let stuck = count(&agents, |a| {
            !a.active_anomalies.contains(&AnomalyKind::ErrorState)
                && (a.state == HealthState::Stuck || !a.active_anomalies.is_empty())
                && a.state != HealthState::Escalated
        });
        let healthy = count(&agents, AgentHealth::is_healthy);
        let restarting = count(&agents, |a| a.state == HealthState::Restarting);
        let escalated = count(&agents, |a| a.state == HealthState::Escalated);
        Self {
            generated_at,
            total: agents.len(),
            healthy,
            stuck,
            error,
            restarting,
            escalated,
            agents,
        }
    }
}

fn count(agents: &[AgentHealth], predicate: impl Fn(&AgentHealth) -> bool) -> usize {
    agents.iter().filter(|agent| predicate(agent)).count()
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub checked: usize,
    pub anomalies: Vec<AnomalyEvent>,
    /// Agents that polled clean after being anomalous
    pub recovered: Vec<String>,
    /// Agents skipped this cycle, with the reason
    pub skipped: Vec<(String, String)>,
    /// Set when the whole cycle failed, e.g. the store was unreachable
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub stuck_timeout_secs: u64,
    pub stagnation_timeout_secs: u64,
    /// Minimum gap between two events of the same kind for one employee
    pub anomaly_cooldown_secs: u64,
    pub status_timeout_secs: u64,
    pub anomaly_log_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            stuck_timeout_secs: 600,
            stagnation_timeout_secs: 300,
            anomaly_cooldown_secs: 300,
            status_timeout_secs: 10,
            anomaly_log_capacity: 256,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::seconds(self.poll_interval_secs as i64)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::seconds(self.stuck_timeout_secs as i64)
    }

    pub fn stagnation_timeout(&self) -> Duration {
        Duration::seconds(self.stagnation_timeout_secs as i64)
    }

    /// Never shorter than one poll interval
    pub fn anomaly_cooldown(&self) -> Duration {
        Duration::seconds(self.anomaly_cooldown_secs.max(self.poll_interval_secs) as i64)
    }

    pub fn status_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.status_timeout_secs)
    }
}
