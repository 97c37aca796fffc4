//! Local process runner: the producer side of a session stream.
//!
//! Output is read line by line from stdout and stderr, numbered by a single
//! sequencer task, published on the broadcast channel and aggregated for the
//! durable record written when the process exits.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use async_channel::Sender;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::errors::RunnerError;
use crate::record::ExecutionOutcome;
use crate::record::ExecutionStatus;
use crate::record::RecordStore;
use crate::session::RunHandle;
use crate::session::RunnerKind;
use crate::session::SessionId;
use crate::session::SessionRunner;
use crate::session::SessionSpec;
use crate::stream::BroadcastChannel;
use crate::stream::OutputSequencer;

pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024; // 1 MiB of recent output
const MAX_LINE_BYTES: usize = 64 * 1024; // longer lines are split into several chunks

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub shell: String,
    /// Base environment; the session spec's entries win on conflict.
    pub env: BTreeMap<String, String>,
    /// Cap on the output kept for the execution record. The oldest lines go
    /// first.
    pub max_output_bytes: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            env: BTreeMap::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

pub struct LocalProcessRunner {
    channel: Arc<dyn BroadcastChannel>,
    records: Arc<dyn RecordStore>,
    settings: RunnerSettings,
    active: Arc<StdMutex<HashMap<SessionId, CancellationToken>>>,
}

impl std::fmt::Debug for LocalProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessRunner")
            .field("settings", &self.settings)
            .field("active", &self.active_sessions())
            .finish()
    }
}

impl LocalProcessRunner {
    pub fn new(
        channel: Arc<dyn BroadcastChannel>,
        records: Arc<dyn RecordStore>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            channel,
            records,
            settings,
            active: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn merged_env(&self, spec: &SessionSpec) -> BTreeMap<String, String> {
        let mut env = self.settings.env.clone();
        env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    fn shell_command(&self, script: &str, env: &BTreeMap<String, String>) -> Command {
        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg("-c").arg(script).envs(env);
        cmd
    }

    fn session_command(
        &self,
        spec: &SessionSpec,
        env: &BTreeMap<String, String>,
    ) -> Result<(String, Command), RunnerError> {
        match spec.runner {
            RunnerKind::Local => {
                let (program, args) = spec
                    .command
                    .split_first()
                    .ok_or_else(|| RunnerError::Unsupported("empty command".to_string()))?;
                let mut cmd = Command::new(program);
                cmd.args(args).envs(env);
                Ok((program.clone(), cmd))
            }
            RunnerKind::Shell => Ok((
                self.settings.shell.clone(),
                self.shell_command(&spec.command.join(" "), env),
            )),
        }
    }

    /// Runs bootstrap steps to completion, returning their combined output.
    async fn bootstrap(
        &self,
        spec: &SessionSpec,
        env: &BTreeMap<String, String>,
    ) -> Result<String, RunnerError> {
        let mut transcript = String::new();
        for step in &spec.bootstrap {
            let output = self
                .shell_command(step, env)
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|source| RunnerError::Spawn {
                    program: self.settings.shell.clone(),
                    source,
                })?;
            transcript.push_str(&String::from_utf8_lossy(&output.stdout));
            transcript.push_str(&String::from_utf8_lossy(&output.stderr));
            if !output.status.success() {
                return Err(RunnerError::Bootstrap {
                    step: step.clone(),
                    code: output.status.code(),
                });
            }
        }
        Ok(transcript)
    }
}

#[async_trait]
impl SessionRunner for LocalProcessRunner {
    async fn start_session(
        &self,
        session_id: &SessionId,
        spec: &SessionSpec,
    ) -> Result<RunHandle, RunnerError> {
        if self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
        {
            return Err(RunnerError::AlreadyRunning(session_id.clone()));
        }

        let env = self.merged_env(spec);
        let transcript = self.bootstrap(spec, &env).await?;

        let (program, mut cmd) = self.session_command(spec, &env)?;
        let child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn { program, source })?;

        let cancel = CancellationToken::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), cancel.clone());

        let (completion_tx, handle) = RunHandle::pending();
        let supervisor = Supervisor {
            session_id: session_id.clone(),
            channel: Arc::clone(&self.channel),
            records: Arc::clone(&self.records),
            active: Arc::clone(&self.active),
            cancel,
            completion: completion_tx,
            max_output_bytes: self.settings.max_output_bytes,
        };
        tokio::spawn(supervisor.run(child, transcript));
        Ok(handle)
    }

    async fn stop_session(&self, session_id: &SessionId) -> Result<(), RunnerError> {
        let token = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned();
        match token {
            Some(token) => token.cancel(),
            None => tracing::debug!(session_id = %session_id, "stop for inactive session"),
        }
        Ok(())
    }
}

struct Supervisor {
    session_id: SessionId,
    channel: Arc<dyn BroadcastChannel>,
    records: Arc<dyn RecordStore>,
    active: Arc<StdMutex<HashMap<SessionId, CancellationToken>>>,
    cancel: CancellationToken,
    completion: watch::Sender<Option<ExecutionStatus>>,
    max_output_bytes: usize,
}

impl Supervisor {
    async fn run(self, mut child: Child, transcript: String) {
        let mut output = OutputTail::new(self.max_output_bytes);
        output.push_text(&transcript);

        let (line_tx, line_rx) = async_channel::unbounded::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut sequencer = OutputSequencer::new(self.session_id.clone());
        let mut cancelled = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                line = line_rx.recv() => {
                    let Ok(line) = line else { break };
                    output.push_line(&line);
                    self.channel.broadcast(sequencer.next_event(line));
                }
            }
        }
        // Pipes can close before the process exits, so stop stays observable
        // while waiting.
        drop(line_rx);

        let exit = if cancelled {
            self.kill(&mut child).await
        } else {
            tokio::select! {
                exit = child.wait() => exit,
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    self.kill(&mut child).await
                }
            }
        };
        let output = output.into_output();
        let outcome = match exit {
            _ if cancelled => ExecutionOutcome::new(ExecutionStatus::Cancelled, output),
            Ok(status) if status.success() => {
                ExecutionOutcome::new(ExecutionStatus::Done, output).with_exit_code(0)
            }
            Ok(status) => {
                let outcome = ExecutionOutcome::new(ExecutionStatus::Error, output);
                match status.code() {
                    Some(code) => outcome.with_exit_code(code),
                    None => outcome,
                }
            }
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, error = %err, "failed to reap session process");
                ExecutionOutcome::new(ExecutionStatus::Error, output)
            }
        };
        let status = outcome.status;

        if let Err(err) = self
            .records
            .record_execution_complete(&self.session_id, outcome)
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %err, "failed to persist execution record");
        }
        self.channel.close_topic(&self.session_id);
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);

        tracing::debug!(
            session_id = %self.session_id,
            %status,
            chunks = sequencer.issued(),
            "session finished"
        );
        self.completion.send_replace(Some(status));
    }

    async fn kill(&self, child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
        if let Err(err) = child.start_kill() {
            tracing::warn!(session_id = %self.session_id, error = %err, "failed to kill session process");
        }
        child.wait().await
    }
}

/// The most recent output of a session, trimmed from the front on line
/// boundaries once it outgrows `max_bytes`.
#[derive(Debug)]
struct OutputTail {
    text: String,
    max_bytes: usize,
    dropped_bytes: usize,
}

impl OutputTail {
    fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            max_bytes: max_bytes.max(1),
            dropped_bytes: 0,
        }
    }

    fn push_text(&mut self, text: &str) {
        for line in text.lines() {
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        if self.text.len() <= self.max_bytes {
            return;
        }
        let excess = self.text.len() - self.max_bytes;
        // Cutting just past a '\n' always lands on a char boundary.
        let cut = self.text.as_bytes()[excess..]
            .iter()
            .position(|byte| *byte == b'\n')
            .map_or(self.text.len(), |idx| excess + idx + 1);
        self.text.drain(..cut);
        self.dropped_bytes += cut;
    }

    fn into_output(self) -> String {
        if self.dropped_bytes == 0 {
            return self.text;
        }
        format!(
            "[output truncated: {} earlier bytes dropped]\n{}",
            self.dropped_bytes, self.text
        )
    }
}

async fn read_lines<R: AsyncRead + Unpin + Send + 'static>(reader: R, tx: Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "output reader stopped");
                break;
            }
        }
    }
}
