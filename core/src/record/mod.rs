//! Durable execution records: the terminal status and full output of a
//! finished session, independent of the live channel.

mod file;

pub use file::FileRecordStore;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::RecordError;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Done,
    Error,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Done => write!(f, "done"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the producer reports when a session completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub output: String,
    pub exit_code: Option<i32>,
}

impl ExecutionOutcome {
    pub fn new(status: ExecutionStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub session_id: SessionId,
    pub status: ExecutionStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn from_outcome(session_id: SessionId, outcome: ExecutionOutcome) -> Self {
        let ExecutionOutcome {
            status,
            output,
            exit_code,
        } = outcome;
        Self {
            session_id,
            status,
            output,
            exit_code,
            recorded_at: Utc::now(),
        }
    }

    pub fn output_lines(&self) -> Vec<String> {
        self.output.lines().map(str::to_string).collect()
    }
}

/// Write path used by the producer, read path used by degraded views.
/// A second write for the same session replaces the first.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn record_execution_complete(
        &self,
        session_id: &SessionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, RecordError>;

    async fn fetch(&self, session_id: &SessionId) -> Result<Option<ExecutionRecord>, RecordError>;
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<SessionId, ExecutionRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn record_execution_complete(
        &self,
        session_id: &SessionId,
        outcome: ExecutionOutcome,
    ) -> Result<ExecutionRecord, RecordError> {
        let record = ExecutionRecord::from_outcome(session_id.clone(), outcome);
        self.records
            .lock()
            .await
            .insert(session_id.clone(), record.clone());
        Ok(record)
    }

    async fn fetch(&self, session_id: &SessionId) -> Result<Option<ExecutionRecord>, RecordError> {
        Ok(self.records.lock().await.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn later_write_replaces_earlier_one() {
        let store = InMemoryRecordStore::new();
        let id = SessionId::new("s1");
        store
            .record_execution_complete(&id, ExecutionOutcome::new(ExecutionStatus::Error, "boom"))
            .await
            .expect("first write");
        store
            .record_execution_complete(
                &id,
                ExecutionOutcome::new(ExecutionStatus::Done, "ok").with_exit_code(0),
            )
            .await
            .expect("second write");

        let record = store.fetch(&id).await.expect("fetch").expect("record");
        assert_eq!(record.status, ExecutionStatus::Done);
        assert_eq!(record.output, "ok");
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_session_has_no_record() {
        let store = InMemoryRecordStore::new();
        assert_eq!(store.fetch(&SessionId::new("nope")).await.expect("fetch"), None);
    }

    #[test]
    fn output_lines_split_on_newlines() {
        let record = ExecutionRecord::from_outcome(
            SessionId::new("s"),
            ExecutionOutcome::new(ExecutionStatus::Done, "a\nb\n"),
        );
        assert_eq!(record.output_lines(), vec!["a", "b"]);
    }
}
