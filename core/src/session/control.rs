use std::fmt;

use serde::Serialize;

use super::runner::RunHandle;
use super::session_id::SessionId;
use crate::record::ExecutionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Id reserved; the runner has not finished starting the command.
    Starting,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of a stop request. Every variant is a success: stop only
/// guarantees the session is no longer running afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    AlreadyStopped,
    NoSuchSession,
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::AlreadyStopped => write!(f, "already_stopped"),
            Self::NoSuchSession => write!(f, "no_such_session"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub session_id: SessionId,
    pub status: StopStatus,
}

/// Returned by a successful start.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub command_preview: String,
    pub run: RunHandle,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Waits until the runner reports a terminal status.
    pub async fn wait(&mut self) -> Option<ExecutionStatus> {
        self.run.wait().await
    }
}
