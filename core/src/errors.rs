use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionId;

/// Reasons a live subscription could not be established. Every variant sends
/// the view into degraded mode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("broadcast channel is closed")]
    ChannelClosed,
    #[error("subscription to topic {topic} rejected: {reason}")]
    Rejected { topic: SessionId, reason: String },
}

impl SubscribeError {
    pub fn rejected(topic: &SessionId, reason: impl Into<String>) -> Self {
        Self::Rejected {
            topic: topic.clone(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record store i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("record for session {session_id} is malformed: {source}")]
    Serialization {
        session_id: SessionId,
        #[source]
        source: serde_json::Error,
    },
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

impl RecordError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bootstrap step `{step}` failed with exit code {code:?}")]
    Bootstrap { step: String, code: Option<i32> },
    #[error("runner kind `{0}` is not supported by this runner")]
    Unsupported(String),
    #[error("session {0} is already running on this runner")]
    AlreadyRunning(SessionId),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("session {0} is already running")]
    AlreadyRunning(SessionId),
    #[error("invalid session spec: {0}")]
    InvalidSpec(String),
    #[error("runner failed to start session {session_id}: {source}")]
    Runner {
        session_id: SessionId,
        #[source]
        source: RunnerError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
