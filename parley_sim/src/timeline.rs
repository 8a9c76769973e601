//! Ordered, mutable schedule of pending scenario events.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use crate::error::HarnessError;
use crate::scenario::Action;

/// An event owned by the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    /// Offset from scenario start
    pub at: Duration,
    /// Insertion order; breaks ties between equal timestamps
    pub seq: u64,
    pub action: Action,
}

/// Heap entry ordered so that `BinaryHeap` (a max-heap) pops the smallest
/// `(at, seq)` first.
struct HeapItem(TimelineEvent);

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.0.at, other.0.seq).cmp(&(self.0.at, self.0.seq))
    }
}

/// Min-heap of events keyed by `(timestamp, sequence)`.
///
/// Insertion is allowed at any time not earlier than the watermark, the
/// latest instant the timeline has been drained at. That covers both the
/// initial load and branches inserted mid-run.
#[derive(Default)]
pub struct Timeline {
    heap: BinaryHeap<HeapItem>,
    next_seq: u64,
    watermark: Duration,
    consumed: usize,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an event and returns its sequence number.
    pub fn schedule(&mut self, at: Duration, action: Action) -> Result<u64, HarnessError> {
        if at < self.watermark {
            return Err(HarnessError::ClockOrderViolation {
                requested: at,
                now: self.watermark,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(?at, seq, kind = %action.kind(), "event scheduled");
        self.heap.push(HeapItem(TimelineEvent { at, seq, action }));
        Ok(seq)
    }

    /// Timestamp of the earliest pending event.
    pub fn next_due_at(&self) -> Option<Duration> {
        self.heap.peek().map(|item| item.0.at)
    }

    /// Pops the earliest event if it is due at `now`.
    pub fn pop_next_due(&mut self, now: Duration) -> Option<TimelineEvent> {
        self.watermark = self.watermark.max(now);
        if self.next_due_at()? > now {
            return None;
        }
        let HeapItem(event) = self.heap.pop()?;
        self.consumed += 1;
        Some(event)
    }

    /// Pops every event due at `now`, in order.
    pub fn pop_due(&mut self, now: Duration) -> Vec<TimelineEvent> {
        let mut due = Vec::new();
        while let Some(event) = self.pop_next_due(now) {
            due.push(event);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of events handed out so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn watermark(&self) -> Duration {
        self.watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wait(ms: u64) -> Action {
        Action::Wait { duration_ms: ms }
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut timeline = Timeline::new();
        let first = timeline.schedule(Duration::from_secs(1), wait(1)).unwrap();
        let second = timeline.schedule(Duration::from_secs(1), wait(2)).unwrap();
        timeline.schedule(Duration::ZERO, wait(3)).unwrap();

        let due = timeline.pop_due(Duration::from_secs(1));
        let seqs: Vec<u64> = due.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, first, second]);
        assert_eq!(timeline.consumed(), 3);
    }

    #[test]
    fn test_nothing_yielded_before_its_time() {
        let mut timeline = Timeline::new();
        timeline.schedule(Duration::from_secs(2), wait(0)).unwrap();
        assert!(timeline.pop_due(Duration::from_millis(1999)).is_empty());
        assert_eq!(timeline.next_due_at(), Some(Duration::from_secs(2)));
        assert_eq!(timeline.pop_due(Duration::from_secs(2)).len(), 1);
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_schedule_before_watermark_rejected() {
        let mut timeline = Timeline::new();
        timeline.pop_due(Duration::from_secs(5));
        assert!(matches!(
            timeline.schedule(Duration::from_secs(4), wait(0)),
            Err(HarnessError::ClockOrderViolation { .. })
        ));
        assert!(timeline.schedule(Duration::from_secs(5), wait(0)).is_ok());
    }

    proptest! {
        #[test]
        fn prop_yields_in_order_with_dynamic_insertion(
            initial in prop::collection::vec(0u64..10_000, 1..40),
            inserted in prop::collection::vec(0u64..3_000, 0..20),
            steps in prop::collection::vec(1u64..1_500, 1..30),
        ) {
            let mut timeline = Timeline::new();
            for at in &initial {
                timeline.schedule(Duration::from_millis(*at), wait(0)).unwrap();
            }

            let mut now = Duration::ZERO;
            let mut last: Option<(Duration, u64)> = None;
            let mut extra = inserted.into_iter();
            let mut step = steps.iter().cycle();

            while !timeline.is_empty() {
                now += Duration::from_millis(*step.next().unwrap());
                for event in timeline.pop_due(now) {
                    prop_assert!(event.at <= now);
                    if let Some(prev) = last {
                        prop_assert!(prev <= (event.at, event.seq));
                    }
                    last = Some((event.at, event.seq));

                    // Branch-style insertion relative to the firing time
                    if let Some(offset) = extra.next() {
                        timeline
                            .schedule(now + Duration::from_millis(offset), wait(0))
                            .unwrap();
                    }
                }
            }
        }
    }
}
