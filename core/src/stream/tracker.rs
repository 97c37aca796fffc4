//! Forward-only reconstruction of a session log from an unordered, lossy
//! event stream.
//!
//! The tracker never buffers: an event ahead of the cursor is appended right
//! away behind a discontinuity marker, and anything behind the cursor is
//! dropped. A late event therefore never fills a gap that was already
//! reported.

use serde::Serialize;

use super::event::Discontinuity;
use super::event::LogEntry;
use super::event::SequencedEvent;

const FIRST_SEQUENCE: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The event was the expected one and was appended.
    Appended { sequence: u64 },
    /// The event skipped ahead; a marker and the chunk were appended.
    Resumed(Discontinuity),
    /// The event was at or behind the cursor and was ignored.
    Stale { sequence: u64, expected: u64 },
}

#[derive(Debug, Clone)]
pub struct StreamTracker {
    /// `None` until the first chunk is appended.
    last_appended: Option<u64>,
    discontinuities: u64,
    log: Vec<LogEntry>,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        Self {
            last_appended: None,
            discontinuities: 0,
            log: Vec::new(),
        }
    }

    pub fn ingest(&mut self, event: SequencedEvent) -> IngestOutcome {
        let expected = self.expected_next_sequence();
        let SequencedEvent {
            sequence, chunk, ..
        } = event;

        let stale = match self.last_appended {
            Some(last) => sequence <= last,
            None => sequence < FIRST_SEQUENCE,
        };
        if stale {
            tracing::trace!(sequence, expected, "dropping stale stream event");
            return IngestOutcome::Stale { sequence, expected };
        }

        let outcome = if sequence == expected {
            IngestOutcome::Appended { sequence }
        } else {
            let gap = Discontinuity {
                missing_start: expected,
                missing_end: sequence - 1,
                resumed_at: sequence,
            };
            self.log.push(LogEntry::Discontinuity(gap));
            self.discontinuities += 1;
            tracing::debug!(
                missing_start = gap.missing_start,
                missing_end = gap.missing_end,
                resumed_at = gap.resumed_at,
                "stream discontinuity"
            );
            IngestOutcome::Resumed(gap)
        };

        self.log.push(LogEntry::Chunk {
            sequence,
            text: chunk,
        });
        self.last_appended = Some(sequence);
        outcome
    }

    /// Saturates at `u64::MAX`; once that sequence is appended every later
    /// event is stale.
    pub fn expected_next_sequence(&self) -> u64 {
        self.last_appended
            .map_or(FIRST_SEQUENCE, |last| last.saturating_add(1))
    }

    pub fn discontinuity_count(&self) -> u64 {
        self.discontinuities
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn rendered_lines(&self) -> Vec<String> {
        self.log.iter().map(LogEntry::render).collect()
    }

    pub fn discontinuity_label(&self) -> String {
        format_discontinuity_label(self.discontinuities)
    }
}

pub fn format_discontinuity_label(count: u64) -> String {
    format!("discontinuities: {count}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn event(sequence: u64) -> SequencedEvent {
        SequencedEvent::new(SessionId::new("t"), sequence, format!("chunk-{sequence}"))
    }

    fn feed(order: &[u64]) -> StreamTracker {
        let mut tracker = StreamTracker::new();
        for seq in order {
            tracker.ingest(event(*seq));
        }
        tracker
    }

    fn chunk_sequences(tracker: &StreamTracker) -> Vec<u64> {
        tracker
            .entries()
            .iter()
            .filter_map(LogEntry::sequence)
            .collect()
    }

    /// Every permutation of `items`, built with Heap's algorithm.
    fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
        let mut current = items.to_vec();
        let mut counters = vec![0usize; current.len()];
        let mut out = vec![current.clone()];
        let mut i = 0;
        while i < current.len() {
            if counters[i] < i {
                if i % 2 == 0 {
                    current.swap(0, i);
                } else {
                    current.swap(counters[i], i);
                }
                out.push(current.clone());
                counters[i] += 1;
                i = 0;
            } else {
                counters[i] = 0;
                i += 1;
            }
        }
        out
    }

    #[test]
    fn in_order_arrivals_have_no_gaps() {
        let tracker = feed(&[1, 2, 3]);
        assert_eq!(
            tracker.rendered_lines(),
            vec!["chunk-1", "chunk-2", "chunk-3"]
        );
        assert_eq!(tracker.discontinuity_count(), 0);
        assert_eq!(tracker.expected_next_sequence(), 4);
        assert_eq!(tracker.discontinuity_label(), "discontinuities: 0");
    }

    #[test]
    fn late_event_after_gap_is_dropped() {
        let mut tracker = StreamTracker::new();
        assert_matches!(
            tracker.ingest(event(1)),
            IngestOutcome::Appended { sequence: 1 }
        );
        assert_matches!(
            tracker.ingest(event(3)),
            IngestOutcome::Resumed(Discontinuity {
                missing_start: 2,
                missing_end: 2,
                resumed_at: 3,
            })
        );
        assert_matches!(
            tracker.ingest(event(2)),
            IngestOutcome::Stale {
                sequence: 2,
                expected: 4
            }
        );

        assert_eq!(
            tracker.rendered_lines(),
            vec![
                "chunk-1".to_string(),
                "[stream discontinuity] missing output sequence 2..2; resumed at 3.".to_string(),
                "chunk-3".to_string(),
            ]
        );
        assert_eq!(tracker.discontinuity_count(), 1);
        assert_eq!(tracker.discontinuity_label(), "discontinuities: 1");
    }

    #[test]
    fn gap_at_stream_start_is_reported() {
        let tracker = feed(&[3, 4]);
        assert_eq!(
            tracker.entries()[0],
            LogEntry::Discontinuity(Discontinuity {
                missing_start: 1,
                missing_end: 2,
                resumed_at: 3,
            })
        );
        assert_eq!(chunk_sequences(&tracker), vec![3, 4]);
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let tracker = feed(&[1, 1, 2, 2]);
        assert_eq!(chunk_sequences(&tracker), vec![1, 2]);
        assert_eq!(tracker.discontinuity_count(), 0);
    }

    #[test]
    fn sequence_zero_is_stale_on_fresh_tracker() {
        let mut tracker = StreamTracker::new();
        assert_matches!(tracker.ingest(event(0)), IngestOutcome::Stale { .. });
        assert!(tracker.entries().is_empty());
    }

    #[test]
    fn counts_maximal_skipped_ranges_not_missing_events() {
        // 2..4 is one range, 6 another; 5 and 2 arrive late and are dropped.
        let tracker = feed(&[1, 5, 2, 7, 6]);
        assert_eq!(chunk_sequences(&tracker), vec![1, 5, 7]);
        assert_eq!(tracker.discontinuity_count(), 2);
    }

    #[test]
    fn every_permutation_keeps_chunks_strictly_increasing() {
        for order in permutations(&[1, 2, 3, 4, 5, 6]) {
            let tracker = feed(&order);
            let seqs = chunk_sequences(&tracker);
            assert!(
                seqs.windows(2).all(|pair| pair[0] < pair[1]),
                "order {order:?} produced {seqs:?}"
            );

            let markers = tracker
                .entries()
                .iter()
                .filter(|entry| matches!(entry, LogEntry::Discontinuity(_)))
                .count() as u64;
            assert_eq!(markers, tracker.discontinuity_count());
        }
    }

    #[test]
    fn advanced_cursor_never_resurrects_earlier_chunks() {
        for order in permutations(&[1, 2, 3, 4, 5]) {
            let mut tracker = StreamTracker::new();
            let mut high_water = 0;
            for seq in &order {
                tracker.ingest(event(*seq));
                let newest = chunk_sequences(&tracker).last().copied().unwrap_or(0);
                assert!(newest >= high_water, "order {order:?} went backwards");
                high_water = newest;
            }
        }
    }

    #[test]
    fn gaps_are_disjoint_and_cover_skipped_ranges() {
        for order in permutations(&[1, 2, 3, 4, 5]) {
            let tracker = feed(&order);
            let mut cursor = 1;
            for entry in tracker.entries() {
                match entry {
                    LogEntry::Discontinuity(gap) => {
                        assert_eq!(gap.missing_start, cursor);
                        assert_eq!(gap.resumed_at, gap.missing_end + 1);
                        cursor = gap.resumed_at;
                    }
                    LogEntry::Chunk { sequence, .. } => {
                        assert_eq!(*sequence, cursor);
                        cursor = sequence + 1;
                    }
                }
            }
        }
    }

    #[test]
    fn final_sequence_is_appended_once() {
        let mut tracker = StreamTracker::new();
        assert_matches!(
            tracker.ingest(event(u64::MAX)),
            IngestOutcome::Resumed(gap) if gap.missing_start == 1 && gap.missing_end == u64::MAX - 1
        );
        assert_matches!(
            tracker.ingest(event(u64::MAX)),
            IngestOutcome::Stale { sequence: u64::MAX, expected: u64::MAX }
        );
        assert_eq!(chunk_sequences(&tracker), vec![u64::MAX]);
        assert_eq!(tracker.discontinuity_count(), 1);
    }
}
