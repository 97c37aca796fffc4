use async_trait::async_trait;
use tokio::sync::watch;

use super::session_id::SessionId;
use super::spec::SessionSpec;
use crate::errors::RunnerError;
use crate::record::ExecutionStatus;

/// Executes the command behind a session. How and where it runs is up to
/// the implementation; the stream layer only sees the events it publishes.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn start_session(
        &self,
        session_id: &SessionId,
        spec: &SessionSpec,
    ) -> Result<RunHandle, RunnerError>;

    /// Terminates the session. Unknown sessions are already stopped, so they
    /// report success.
    async fn stop_session(&self, session_id: &SessionId) -> Result<(), RunnerError>;
}

/// Completion signal for a started session. Resolves to the terminal status
/// once the runner has written the durable record.
#[derive(Debug, Clone)]
pub struct RunHandle {
    completion: watch::Receiver<Option<ExecutionStatus>>,
}

impl RunHandle {
    pub fn new(completion: watch::Receiver<Option<ExecutionStatus>>) -> Self {
        Self { completion }
    }

    /// A handle paired with the sender the runner uses to report completion.
    pub fn pending() -> (watch::Sender<Option<ExecutionStatus>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self::new(rx))
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        *self.completion.borrow()
    }

    /// Waits for completion. `None` if the runner went away without
    /// reporting a status.
    pub async fn wait(&mut self) -> Option<ExecutionStatus> {
        let reported = self
            .completion
            .wait_for(Option::is_some)
            .await
            .map(|status| *status);
        match reported {
            Ok(status) => status,
            Err(_) => *self.completion.borrow(),
        }
    }
}
