use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::control::SessionHandle;
use super::control::SessionState;
use super::control::StopResponse;
use super::control::StopStatus;
use super::runner::RunHandle;
use super::runner::SessionRunner;
use super::session_id::SessionId;
use super::spec::SessionSpec;
use crate::errors::LifecycleError;
use crate::stream::BroadcastChannel;

/// Binds session ids to running commands and tears them down again.
///
/// The registry lock is only held for bookkeeping. A start reserves its id
/// first, runs the runner without the lock, then commits or releases the
/// reservation, so a slow start never blocks other sessions and a failed
/// start leaves nothing bound.
pub struct SessionController {
    runner: Arc<dyn SessionRunner>,
    channel: Arc<dyn BroadcastChannel>,
    sessions: Mutex<HashMap<SessionId, BoundSession>>,
}

struct BoundSession {
    stopped: bool,
    /// `None` while the runner is still starting the command.
    run: Option<RunHandle>,
}

impl BoundSession {
    fn state(&self) -> SessionState {
        match &self.run {
            None => SessionState::Starting,
            // A session whose command already exited counts as stopped.
            Some(run) if self.stopped || run.status().is_some() => SessionState::Stopped,
            Some(_) => SessionState::Running,
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController").finish_non_exhaustive()
    }
}

impl SessionController {
    pub fn new(runner: Arc<dyn SessionRunner>, channel: Arc<dyn BroadcastChannel>) -> Self {
        Self {
            runner,
            channel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &Arc<dyn BroadcastChannel> {
        &self.channel
    }

    pub async fn start(
        &self,
        session_id: Option<SessionId>,
        spec: SessionSpec,
    ) -> Result<SessionHandle, LifecycleError> {
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        if session_id.is_blank() {
            return Err(LifecycleError::InvalidSpec(
                "session id must not be blank".to_string(),
            ));
        }
        spec.validate().map_err(LifecycleError::InvalidSpec)?;

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(bound) = sessions.get(&session_id)
                && bound.state() != SessionState::Stopped
            {
                return Err(LifecycleError::AlreadyRunning(session_id));
            }
            sessions.insert(
                session_id.clone(),
                BoundSession {
                    stopped: false,
                    run: None,
                },
            );
        }

        let started = self.runner.start_session(&session_id, &spec).await;

        let stopped_while_starting = {
            let mut sessions = self.sessions.lock().await;
            match &started {
                Ok(run) => match sessions.get_mut(&session_id) {
                    Some(bound) => {
                        bound.run = Some(run.clone());
                        bound.stopped
                    }
                    None => true,
                },
                Err(_) => {
                    sessions.remove(&session_id);
                    false
                }
            }
        };
        let run = started.map_err(|source| LifecycleError::Runner {
            session_id: session_id.clone(),
            source,
        })?;

        if stopped_while_starting {
            tracing::debug!(session_id = %session_id, "stop arrived during start");
            self.shut_down(&session_id, run.clone()).await;
        } else {
            tracing::debug!(
                session_id = %session_id,
                runner = %spec.runner,
                command = %spec.command_preview(),
                "session started"
            );
        }
        Ok(SessionHandle {
            session_id,
            command_preview: spec.command_preview(),
            run,
        })
    }

    /// Always succeeds; an unknown or already-stopped id is reported as such
    /// but is not an error. When it reports `Stopped` the command has exited
    /// and its id can be started again.
    pub async fn stop(&self, session_id: &SessionId) -> StopResponse {
        let (status, run) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(session_id) {
                None => (StopStatus::NoSuchSession, None),
                Some(bound) => {
                    let status = if bound.stopped || bound.state() == SessionState::Stopped {
                        StopStatus::AlreadyStopped
                    } else {
                        StopStatus::Stopped
                    };
                    bound.stopped = true;
                    let run = match status {
                        StopStatus::Stopped => bound.run.clone(),
                        _ => None,
                    };
                    (status, run)
                }
            }
        };

        match run {
            Some(run) => self.shut_down(session_id, run).await,
            // A session still starting is shut down by its start call.
            None if status == StopStatus::Stopped => {
                tracing::debug!(session_id = %session_id, "stop deferred until start completes");
            }
            None => tracing::debug!(session_id = %session_id, %status, "stop was a no-op"),
        }

        StopResponse {
            session_id: session_id.clone(),
            status,
        }
    }

    async fn shut_down(&self, session_id: &SessionId, mut run: RunHandle) {
        // Viewers are detached before the command is killed.
        let detached = self.channel.close_topic(session_id);
        if let Err(err) = self.runner.stop_session(session_id).await {
            tracing::warn!(session_id = %session_id, error = %err, "runner stop failed");
        }
        let status = run.wait().await;
        tracing::debug!(session_id = %session_id, detached, ?status, "session stopped");
    }

    pub async fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(BoundSession::state)
    }

    pub async fn sessions(&self) -> Vec<(SessionId, SessionState)> {
        let sessions = self.sessions.lock().await;
        let mut list: Vec<_> = sessions
            .iter()
            .map(|(id, bound)| (id.clone(), bound.state()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }
}
