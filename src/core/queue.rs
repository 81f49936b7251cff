//! Pending event queue.
//!
//! Records are appended at the tail and batches are taken from the front.
//! A batch whose transmission failed goes back to the front in its original
//! order, ahead of anything queued while it was in flight.

use crate::collector::types::EventRecord;
use std::collections::VecDeque;

/// FIFO of records awaiting transmission.
#[derive(Debug, Default)]
pub struct EventQueue {
    records: VecDeque<EventRecord>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return the new queue length.
    pub fn push(&mut self, record: EventRecord) -> usize {
        self.records.push_back(record);
        self.records.len()
    }

    /// Remove up to `max` records from the front.
    pub fn take_batch(&mut self, max: usize) -> Vec<EventRecord> {
        let count = max.min(self.records.len());
        self.records.drain(..count).collect()
    }

    /// Put a batch back at the front, preserving its order.
    pub fn requeue_front(&mut self, batch: Vec<EventRecord>) {
        for record in batch.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over queued records, front first.
    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    /// Drop everything still queued, returning how many records were lost.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }
}
