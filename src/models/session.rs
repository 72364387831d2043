use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host-side lifecycle of one embedding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Loading,
    Configured,
    Running,
    Completing,
    Done,
    Failed,
    TimedOut,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub const ALL: [SessionState; 8] = [
        SessionState::Idle,
        SessionState::Loading,
        SessionState::Configured,
        SessionState::Running,
        SessionState::Completing,
        SessionState::Done,
        SessionState::Failed,
        SessionState::TimedOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "IDLE",
            SessionState::Loading => "LOADING",
            SessionState::Configured => "CONFIGURED",
            SessionState::Running => "RUNNING",
            SessionState::Completing => "COMPLETING",
            SessionState::Done => "DONE",
            SessionState::Failed => "FAILED",
            SessionState::TimedOut => "TIMED_OUT",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed | SessionState::TimedOut
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration handed to the task. Only `session_id` is required on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials_per_block: Option<u32>,
}

pub const DEFAULT_STUDY_ID: &str = "default_study";
pub const DEFAULT_SUBJECT_ID: &str = "default_sub";

impl TaskConfig {
    pub fn study_or_default(&self) -> &str {
        self.study_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STUDY_ID)
    }

    pub fn subject_or_default(&self) -> &str {
        self.subject_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT_ID)
    }
}

/// One run of the task inside one embedding. Owned by the host controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub config: TaskConfig,
    pub state: SessionState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the child context signals ready; completion time is measured from here.
    pub ready_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: String, config: TaskConfig) -> Self {
        Self {
            id,
            config,
            state: SessionState::Idle,
            error: None,
            started_at: None,
            ready_at: None,
            completed_at: None,
        }
    }

    /// Seconds between ready and completion, 0 when either end is missing.
    pub fn completion_secs(&self) -> f64 {
        match (self.ready_at, self.completed_at) {
            (Some(ready), Some(done)) => (done - ready).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub state: SessionState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            state: session.state,
            error: session.error,
            started_at: session.started_at,
            completed_at: session.completed_at,
        }
    }
}
