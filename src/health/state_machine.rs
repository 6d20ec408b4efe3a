use statig::prelude::*;

use super::types::{AnomalyKind, HealthState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    AnomalyDetected(AnomalyKind),
    Recovered,
    RestartBegun,
    RestartFinished,
    Escalate,
    /// Manual intervention after escalation
    Clear,
}

pub struct AgentHealthMachine {
    employee: String,
    last_anomaly: Option<AnomalyKind>,
}

impl AgentHealthMachine {
    pub fn new(employee: String) -> Self {
        Self {
            employee,
            last_anomaly: None,
        }
    }

    pub fn employee(&self) -> &str {
        &self.employee
    }

    pub fn last_anomaly(&self) -> Option<AnomalyKind> {
        self.last_anomaly
    }
}

#[state_machine(initial = "State::running()")]
impl AgentHealthMachine {
    #[state]
    fn running(&mut self, event: &HealthEvent) -> Outcome<State> {
        match event {
            HealthEvent::AnomalyDetected(kind) if kind.triggers_recovery() => {
                self.last_anomaly = Some(*kind);
                tracing::debug!(employee = %self.employee, kind = %kind, "Agent is stuck");
                Transition(State::stuck())
            }
            HealthEvent::Escalate => Transition(State::escalated()),
            _ => Handled,
        }
    }

    #[state]
    fn stuck(&mut self, event: &HealthEvent) -> Outcome<State> {
        match event {
            HealthEvent::AnomalyDetected(kind) if kind.triggers_recovery() => {
                self.last_anomaly = Some(*kind);
                Handled
            }
            HealthEvent::Recovered | HealthEvent::Clear => {
                self.last_anomaly = None;
                Transition(State::running())
            }
            HealthEvent::RestartBegun => Transition(State::restarting()),
            HealthEvent::Escalate => Transition(State::escalated()),
            _ => Handled,
        }
    }

    #[state]
    fn restarting(&mut self, event: &HealthEvent) -> Outcome<State> {
        match event {
            HealthEvent::RestartFinished | HealthEvent::Clear => {
                self.last_anomaly = None;
                Transition(State::running())
            }
            HealthEvent::Escalate => Transition(State::escalated()),
            _ => Handled,
        }
    }

    #[state]
    fn escalated(&mut self, event: &HealthEvent) -> Outcome<State> {
        match event {
            HealthEvent::Clear => {
                self.last_anomaly = None;
                tracing::info!(employee = %self.employee, "Escalation cleared");
                Transition(State::running())
            }
            _ => Handled,
        }
    }
}

pub fn health_state(machine: &StateMachine<AgentHealthMachine>) -> HealthState {
    match machine.state() {
        State::Running { .. } => HealthState::Running,
        State::Stuck { .. } => HealthState::Stuck,
        State::Restarting { .. } => HealthState::Restarting,
        State::Escalated { .. } => HealthState::Escalated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StateMachine<AgentHealthMachine> {
        AgentHealthMachine::new("alice".to_string()).state_machine()
    }

    #[test]
    fn test_stuck_agent_can_recover() {
        let mut sm = machine();
        assert_eq!(health_state(&sm), HealthState::Running);

        sm.handle(&HealthEvent::AnomalyDetected(AnomalyKind::ProgressStagnant));
        assert_eq!(health_state(&sm), HealthState::Stuck);
        assert_eq!(sm.inner().last_anomaly(), Some(AnomalyKind::ProgressStagnant));

        sm.handle(&HealthEvent::Recovered);
        assert_eq!(health_state(&sm), HealthState::Running);
    }

    #[test]
    fn test_help_requests_do_not_mark_agent_stuck() {
        let mut sm = machine();
        sm.handle(&HealthEvent::AnomalyDetected(AnomalyKind::HelpRequested));
        assert_eq!(health_state(&sm), HealthState::Running);
    }

    #[test]
    fn test_restart_returns_to_running() {
        let mut sm = machine();
        sm.handle(&HealthEvent::AnomalyDetected(AnomalyKind::StuckState));
        sm.handle(&HealthEvent::RestartBegun);
        assert_eq!(health_state(&sm), HealthState::Restarting);

        // Anomalies during a restart are ignored
        sm.handle(&HealthEvent::AnomalyDetected(AnomalyKind::ErrorState));
        assert_eq!(health_state(&sm), HealthState::Restarting);

        sm.handle(&HealthEvent::RestartFinished);
        assert_eq!(health_state(&sm), HealthState::Running);
    }

    #[test]
    fn test_escalation_holds_until_cleared() {
        let mut sm = machine();
        sm.handle(&HealthEvent::AnomalyDetected(AnomalyKind::ErrorState));
        sm.handle(&HealthEvent::Escalate);
        assert_eq!(health_state(&sm), HealthState::Escalated);

        sm.handle(&HealthEvent::Recovered);
        sm.handle(&HealthEvent::RestartFinished);
        assert_eq!(health_state(&sm), HealthState::Escalated);

        sm.handle(&HealthEvent::Clear);
        assert_eq!(health_state(&sm), HealthState::Running);
        assert_eq!(sm.inner().employee(), "alice");
    }
}
