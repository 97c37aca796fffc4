use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::session::SessionId;

/// One chunk of session output as carried by the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub session_id: SessionId,
    pub sequence: u64,
    pub chunk: String,
}

impl SequencedEvent {
    pub fn new(session_id: SessionId, sequence: u64, chunk: impl Into<String>) -> Self {
        Self {
            session_id,
            sequence,
            chunk: chunk.into(),
        }
    }
}

/// Producer-side sequence assignment. Numbers start at 1 and are never reused.
#[derive(Debug)]
pub struct OutputSequencer {
    session_id: SessionId,
    next_seq: u64,
}

impl OutputSequencer {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            next_seq: 1,
        }
    }

    pub fn next_event(&mut self, chunk: impl Into<String>) -> SequencedEvent {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        SequencedEvent::new(self.session_id.clone(), seq, chunk)
    }

    /// Number of events handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }
}

/// A gap the tracker skipped over: `missing_start..=missing_end` never made
/// it, and the stream picked up again at `resumed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discontinuity {
    pub missing_start: u64,
    pub missing_end: u64,
    pub resumed_at: u64,
}

impl Discontinuity {
    pub fn missing_count(&self) -> u64 {
        self.missing_end - self.missing_start + 1
    }
}

impl fmt::Display for Discontinuity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[stream discontinuity] missing output sequence {}..{}; resumed at {}.",
            self.missing_start, self.missing_end, self.resumed_at
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Chunk { sequence: u64, text: String },
    Discontinuity(Discontinuity),
}

impl LogEntry {
    pub fn sequence(&self) -> Option<u64> {
        match self {
            LogEntry::Chunk { sequence, .. } => Some(*sequence),
            LogEntry::Discontinuity(_) => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            LogEntry::Chunk { text, .. } => text.clone(),
            LogEntry::Discontinuity(gap) => gap.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sequencer_starts_at_one() {
        let mut sequencer = OutputSequencer::new(SessionId::new("s"));
        let first = sequencer.next_event("a");
        let second = sequencer.next_event("b");
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(sequencer.issued(), 2);
    }

    #[test]
    fn discontinuity_marker_text() {
        let gap = Discontinuity {
            missing_start: 4,
            missing_end: 7,
            resumed_at: 8,
        };
        assert_eq!(
            gap.to_string(),
            "[stream discontinuity] missing output sequence 4..7; resumed at 8."
        );
        assert_eq!(gap.missing_count(), 4);
    }
}
