//! Consumer side of a session stream.
//!
//! A [`SessionView`] decides exactly once, at attach time, whether it can
//! follow the live channel. If the subscription fails it switches to the
//! durable record for good: the log becomes static and later channel traffic
//! is never looked at.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::broadcast::BroadcastChannel;
use super::broadcast::Subscription;
use super::event::SequencedEvent;
use super::tracker::IngestOutcome;
use super::tracker::StreamTracker;
use super::tracker::format_discontinuity_label;
use crate::errors::SubscribeError;
use crate::record::ExecutionRecord;
use crate::record::ExecutionStatus;
use crate::record::RecordStore;
use crate::session::SessionId;

pub const DEGRADED_TITLE: &str = "Stream degraded";
pub const DEGRADED_DETAIL: &str = "Showing persisted logs only";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedAlert {
    pub title: String,
    pub detail: String,
    pub reason: String,
}

impl DegradedAlert {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            title: DEGRADED_TITLE.to_string(),
            detail: DEGRADED_DETAIL.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DegradedAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.title, self.detail, self.reason)
    }
}

/// Point-in-time copy of what a view shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSnapshot {
    pub session_id: SessionId,
    pub lines: Vec<String>,
    pub discontinuities: u64,
    pub live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradedAlert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_status: Option<ExecutionStatus>,
}

impl ViewSnapshot {
    pub fn status_line(&self) -> String {
        let label = format_discontinuity_label(self.discontinuities);
        match &self.degraded {
            Some(alert) => format!("{label} | {alert}"),
            None => label,
        }
    }
}

#[derive(Debug)]
enum ViewMode {
    Live {
        subscription: Subscription,
        tracker: StreamTracker,
        closed: bool,
    },
    Degraded {
        alert: DegradedAlert,
        record: Option<ExecutionRecord>,
        lines: Vec<String>,
    },
}

#[derive(Debug)]
pub struct SessionView {
    session_id: SessionId,
    mode: ViewMode,
}

impl SessionView {
    /// Subscribes to `session_id`, or falls back to the persisted record when
    /// the subscription is refused. Never fails.
    pub async fn attach(
        session_id: SessionId,
        channel: &dyn BroadcastChannel,
        records: &dyn RecordStore,
    ) -> Self {
        match channel.subscribe(&session_id).await {
            Ok(subscription) => {
                tracing::debug!(session_id = %session_id, "live view attached");
                Self {
                    session_id,
                    mode: ViewMode::Live {
                        subscription,
                        tracker: StreamTracker::new(),
                        closed: false,
                    },
                }
            }
            Err(err) => Self::degraded(session_id, err, records).await,
        }
    }

    async fn degraded(
        session_id: SessionId,
        cause: SubscribeError,
        records: &dyn RecordStore,
    ) -> Self {
        let (record, reason) = match records.fetch(&session_id).await {
            Ok(Some(record)) => (Some(record), cause.to_string()),
            Ok(None) => (None, format!("{cause}; no persisted record for this session")),
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "failed to load persisted record for degraded view"
                );
                (None, format!("{cause}; persisted record unavailable: {err}"))
            }
        };
        tracing::warn!(session_id = %session_id, reason = %reason, "stream degraded");

        let lines = record
            .as_ref()
            .map(ExecutionRecord::output_lines)
            .unwrap_or_default();
        Self {
            session_id,
            mode: ViewMode::Degraded {
                alert: DegradedAlert::new(reason),
                record,
                lines,
            },
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, ViewMode::Degraded { .. })
    }

    pub fn degraded_alert(&self) -> Option<&DegradedAlert> {
        match &self.mode {
            ViewMode::Degraded { alert, .. } => Some(alert),
            ViewMode::Live { .. } => None,
        }
    }

    pub fn persisted_record(&self) -> Option<&ExecutionRecord> {
        match &self.mode {
            ViewMode::Degraded { record, .. } => record.as_ref(),
            ViewMode::Live { .. } => None,
        }
    }

    /// True while more live events may still arrive.
    pub fn is_live(&self) -> bool {
        matches!(self.mode, ViewMode::Live { closed: false, .. })
    }

    pub fn lines(&self) -> Vec<String> {
        match &self.mode {
            ViewMode::Live { tracker, .. } => tracker.rendered_lines(),
            ViewMode::Degraded { lines, .. } => lines.clone(),
        }
    }

    pub fn discontinuity_count(&self) -> u64 {
        match &self.mode {
            ViewMode::Live { tracker, .. } => tracker.discontinuity_count(),
            ViewMode::Degraded { .. } => 0,
        }
    }

    pub fn discontinuity_label(&self) -> String {
        format_discontinuity_label(self.discontinuity_count())
    }

    /// Waits for the next event for this session and feeds it to the
    /// tracker. Returns `None` once the stream has ended, and always for a
    /// degraded view.
    pub async fn next_update(&mut self) -> Option<IngestOutcome> {
        let ViewMode::Live {
            subscription,
            tracker,
            closed,
        } = &mut self.mode
        else {
            return None;
        };
        if *closed {
            return None;
        }

        loop {
            match subscription.recv().await {
                Some(event) => {
                    if let Some(outcome) = ingest_for(&self.session_id, tracker, event) {
                        return Some(outcome);
                    }
                }
                None => {
                    *closed = true;
                    tracing::debug!(session_id = %self.session_id, "live stream ended");
                    return None;
                }
            }
        }
    }

    /// Ingests whatever is already queued without waiting.
    pub fn drain_ready(&mut self) -> Vec<IngestOutcome> {
        let ViewMode::Live {
            subscription,
            tracker,
            closed,
        } = &mut self.mode
        else {
            return Vec::new();
        };

        let mut outcomes = Vec::new();
        while !*closed {
            match subscription.try_recv() {
                Ok(event) => outcomes.extend(ingest_for(&self.session_id, tracker, event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => *closed = true,
            }
        }
        outcomes
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            session_id: self.session_id.clone(),
            lines: self.lines(),
            discontinuities: self.discontinuity_count(),
            live: self.is_live(),
            degraded: self.degraded_alert().cloned(),
            persisted_status: self.persisted_record().map(|record| record.status),
        }
    }

    /// Runs the view on its own task, publishing a snapshot after every
    /// change. The task finishes when the live stream ends (immediately for
    /// a degraded view) and hands the view back.
    pub fn spawn(mut self) -> ViewTask {
        let (tx, rx) = watch::channel(self.snapshot());
        let handle = tokio::spawn(async move {
            while let Some(outcome) = self.next_update().await {
                if !matches!(outcome, IngestOutcome::Stale { .. }) {
                    tx.send_replace(self.snapshot());
                }
            }
            tx.send_replace(self.snapshot());
            self
        });
        ViewTask {
            updates: rx,
            handle,
        }
    }
}

fn ingest_for(
    session_id: &SessionId,
    tracker: &mut StreamTracker,
    event: SequencedEvent,
) -> Option<IngestOutcome> {
    if &event.session_id != session_id {
        tracing::trace!(
            session_id = %session_id,
            foreign = %event.session_id,
            "ignoring event for another session"
        );
        return None;
    }
    Some(tracker.ingest(event))
}

pub struct ViewTask {
    pub updates: watch::Receiver<ViewSnapshot>,
    handle: JoinHandle<SessionView>,
}

impl ViewTask {
    pub fn latest(&self) -> ViewSnapshot {
        self.updates.borrow().clone()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the view to finish. `None` if the task was aborted.
    pub async fn join(self) -> Option<SessionView> {
        match self.handle.await {
            Ok(view) => Some(view),
            Err(err) => {
                tracing::debug!(error = %err, "view task did not complete");
                None
            }
        }
    }
}
