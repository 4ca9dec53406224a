use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PhotolinkError, Result};

/// Lifecycle of the orchestrator, one instance per session.
///
/// Idle → Validating → Running → (Stopping →) Finished | Stopped | Error → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskState {
    #[default]
    Idle,
    Validating,
    Running,
    /// Stop requested, waiting for the worker to acknowledge.
    Stopping,
    Finished,
    Stopped,
    Error,
}

impl TaskState {
    /// Whether the start control is usable in this state.
    pub fn submission_enabled(self) -> bool {
        matches!(
            self,
            TaskState::Idle | TaskState::Finished | TaskState::Stopped | TaskState::Error
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Stopped | TaskState::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Idle => write!(f, "IDLE"),
            TaskState::Validating => write!(f, "VALIDATING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Stopping => write!(f, "STOPPING"),
            TaskState::Finished => write!(f, "FINISHED"),
            TaskState::Stopped => write!(f, "STOPPED"),
            TaskState::Error => write!(f, "ERROR"),
        }
    }
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Submit,
    ValidationFailed,
    Dispatched,
    StopRequested,
    Finished,
    Stopped,
    Failed,
    Reset,
}

/// Tracks the current [`TaskState`] and every state it passed through.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationStateMachine {
    state: TaskState,
    history: Vec<TaskState>,
}

impl OrchestrationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// States left behind, oldest first.
    pub fn history(&self) -> &[TaskState] {
        &self.history
    }

    pub fn submission_enabled(&self) -> bool {
        self.state.submission_enabled()
    }

    /// Compute the state reached from `state` on `trigger`, if allowed.
    pub fn target(state: TaskState, trigger: Trigger) -> Option<TaskState> {
        use TaskState::*;

        let next = match (state, trigger) {
            (Idle, Trigger::Submit) => Validating,
            (Validating, Trigger::ValidationFailed) => Idle,
            (Validating, Trigger::Dispatched) => Running,
            (Running, Trigger::StopRequested) => Stopping,
            (Running | Stopping, Trigger::Finished) => Finished,
            (Running | Stopping, Trigger::Stopped) => Stopped,
            (Validating | Running | Stopping, Trigger::Failed) => Error,
            (Finished | Stopped | Error, Trigger::Reset) => Idle,
            _ => return None,
        };
        Some(next)
    }

    /// Apply a trigger, recording the previous state in the history.
    pub fn apply(&mut self, trigger: Trigger) -> Result<TaskState> {
        let next = Self::target(self.state, trigger).ok_or(PhotolinkError::InvalidTransition {
            state: self.state,
            trigger,
        })?;
        tracing::debug!(from = %self.state, to = %next, ?trigger, "State transition");
        self.history.push(self.state);
        self.state = next;
        Ok(next)
    }

    /// Apply a terminal trigger and immediately reset back to `Idle`.
    pub fn settle(&mut self, trigger: Trigger) -> Result<TaskState> {
        let terminal = self.apply(trigger)?;
        self.apply(Trigger::Reset)?;
        Ok(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> OrchestrationStateMachine {
        let mut sm = OrchestrationStateMachine::new();
        sm.apply(Trigger::Submit).unwrap();
        sm.apply(Trigger::Dispatched).unwrap();
        sm
    }

    #[test]
    fn happy_path_records_history() {
        let mut sm = running();
        assert_eq!(sm.state(), TaskState::Running);
        assert!(!sm.submission_enabled());

        assert_eq!(sm.settle(Trigger::Finished).unwrap(), TaskState::Finished);
        assert_eq!(sm.state(), TaskState::Idle);
        assert!(sm.submission_enabled());
        assert_eq!(
            sm.history(),
            [
                TaskState::Idle,
                TaskState::Validating,
                TaskState::Running,
                TaskState::Finished,
            ]
        );
    }

    #[test]
    fn validation_failure_returns_to_idle() {
        let mut sm = OrchestrationStateMachine::new();
        sm.apply(Trigger::Submit).unwrap();
        assert!(!sm.submission_enabled());
        sm.apply(Trigger::ValidationFailed).unwrap();
        assert_eq!(sm.state(), TaskState::Idle);
    }

    #[test]
    fn stop_goes_through_stopping() {
        let mut sm = running();
        sm.apply(Trigger::StopRequested).unwrap();
        assert_eq!(sm.state(), TaskState::Stopping);
        assert!(!sm.submission_enabled());

        sm.settle(Trigger::Stopped).unwrap();
        assert_eq!(sm.state(), TaskState::Idle);
        assert_eq!(
            &sm.history()[2..],
            [TaskState::Running, TaskState::Stopping, TaskState::Stopped]
        );
    }

    #[test]
    fn error_while_running_or_stopping() {
        let mut sm = running();
        assert_eq!(sm.settle(Trigger::Failed).unwrap(), TaskState::Error);

        let mut sm = running();
        sm.apply(Trigger::StopRequested).unwrap();
        assert_eq!(sm.settle(Trigger::Failed).unwrap(), TaskState::Error);
        assert_eq!(sm.state(), TaskState::Idle);
    }

    #[test]
    fn finished_can_race_a_stop_request() {
        let mut sm = running();
        sm.apply(Trigger::StopRequested).unwrap();
        assert_eq!(sm.settle(Trigger::Finished).unwrap(), TaskState::Finished);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut sm = OrchestrationStateMachine::new();
        let err = sm.apply(Trigger::Finished).unwrap_err();
        assert!(matches!(
            err,
            PhotolinkError::InvalidTransition {
                state: TaskState::Idle,
                trigger: Trigger::Finished
            }
        ));
        assert_eq!(sm.state(), TaskState::Idle);
        assert!(sm.history().is_empty());

        let mut sm = running();
        assert!(sm.apply(Trigger::Submit).is_err());
        sm.apply(Trigger::StopRequested).unwrap();
        assert!(sm.apply(Trigger::StopRequested).is_err());
    }

    #[test]
    fn only_active_states_disable_submission() {
        for state in [TaskState::Idle, TaskState::Finished, TaskState::Stopped, TaskState::Error] {
            assert!(state.submission_enabled(), "{state}");
        }
        for state in [TaskState::Validating, TaskState::Running, TaskState::Stopping] {
            assert!(!state.submission_enabled(), "{state}");
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(TaskState::Idle.to_string(), "IDLE");
        assert_eq!(TaskState::Stopping.to_string(), "STOPPING");
        assert_eq!(TaskState::Error.to_string(), "ERROR");
    }
}
