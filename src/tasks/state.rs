//! Job state machine.

use serde::{Deserialize, Serialize};

use crate::status::Severity;

/// State of a task job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Constructed, not yet picked up by the scheduler.
    NotStarted,
    /// Task record exists and the work is in flight.
    Running,
    /// Work returned an OK status.
    Succeeded,
    /// Work returned a non-OK, non-cancel status, or blew up.
    Failed,
    /// Canceled before the work finished.
    Canceled,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (NotStarted, Running)
                // finished without ever getting a task record
                | (NotStarted, Succeeded)
                | (NotStarted, Canceled)
                | (NotStarted, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Terminal state a finished job lands in for a result of this severity.
    pub fn terminal_for(severity: Severity) -> Self {
        match severity {
            Severity::Ok => Self::Succeeded,
            Severity::Cancel => Self::Canceled,
            _ => Self::Failed,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(JobState::NotStarted.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Succeeded));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Canceled));
        assert!(JobState::NotStarted.can_transition_to(JobState::Canceled));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!JobState::Succeeded.can_transition_to(JobState::Running));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Canceled));
        assert!(!JobState::Canceled.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Failed.can_transition_to(JobState::Canceled));
        assert!(!JobState::Running.can_transition_to(JobState::NotStarted));
        assert!(!JobState::Running.can_transition_to(JobState::Running));
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::NotStarted.is_terminal());
    }

    #[test]
    fn terminal_state_follows_severity() {
        assert_eq!(JobState::terminal_for(Severity::Ok), JobState::Succeeded);
        assert_eq!(JobState::terminal_for(Severity::Cancel), JobState::Canceled);
        assert_eq!(JobState::terminal_for(Severity::Error), JobState::Failed);
        assert_eq!(JobState::terminal_for(Severity::Warning), JobState::Failed);
        assert_eq!(JobState::terminal_for(Severity::Info), JobState::Failed);
    }

    #[test]
    fn job_state_display() {
        assert_eq!(JobState::NotStarted.to_string(), "not_started");
        assert_eq!(JobState::Canceled.to_string(), "canceled");
    }

    #[test]
    fn job_state_serde_roundtrip() {
        let state = JobState::NotStarted;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"not_started\"");
        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
