//! # Event Buffer
//!
//! Ordered, append-only queue of gated events since the last drain.
//!
//! Appends and drains serialize on one lock, so a drain is a single
//! snapshot-and-clear step: every appended event lands either in the
//! returned snapshot or in the buffer afterwards, never both and never
//! neither. Sequence numbers are assigned under the same lock and keep
//! increasing across drains.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::capture::{CapturedEvent, Event};
use crate::config::OverflowPolicy;

/// Result of a single append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored with this sequence number.
    Stored(u64),
    /// Stored; the oldest buffered event was evicted to make room.
    StoredEvictedOldest(u64),
    /// Rejected because the buffer is full.
    Rejected,
}

#[derive(Debug, Default)]
struct BufferInner {
    events: VecDeque<CapturedEvent>,
    next_seq: u64,
    dropped: u64,
}

/// Thread-safe event buffer.
#[derive(Debug)]
pub struct EventBuffer {
    inner: Mutex<BufferInner>,

    /// `None` means bounded only by memory
    capacity: Option<usize>,

    overflow_policy: OverflowPolicy,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl EventBuffer {
    pub fn new(capacity: Option<usize>, overflow_policy: OverflowPolicy) -> Self {
        EventBuffer {
            inner: Mutex::new(BufferInner::default()),
            capacity,
            overflow_policy,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, OverflowPolicy::DropOldest)
    }

    /// Append an event in capture order. O(1) amortized.
    pub fn append(&self, event: Event) -> AppendOutcome {
        let mut inner = self.inner.lock();

        let mut evicted = false;
        if let Some(capacity) = self.capacity {
            if inner.events.len() >= capacity {
                inner.dropped += 1;
                match self.overflow_policy {
                    OverflowPolicy::DropNewest => return AppendOutcome::Rejected,
                    OverflowPolicy::DropOldest => {
                        inner.events.pop_front();
                        evicted = true;
                    }
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.events.push_back(CapturedEvent { seq, event });

        if evicted {
            AppendOutcome::StoredEvictedOldest(seq)
        } else {
            AppendOutcome::Stored(seq)
        }
    }

    /// Atomically take every buffered event, leaving the buffer empty.
    pub fn drain_snapshot(&self) -> Vec<CapturedEvent> {
        let mut inner = self.inner.lock();
        Vec::from(std::mem::take(&mut inner.events))
    }

    /// Discard buffered events without returning them.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.events.len();
        inner.events.clear();
        discarded
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Events lost to the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
