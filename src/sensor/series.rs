use crate::sensor::types::Reading;
use std::collections::VecDeque;

/// Fixed-capacity, oldest-first series of readings.
///
/// Arrival order is treated as chronological order: `append` never re-sorts,
/// it only evicts from the head once `capacity` is exceeded.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedSeries {
    readings: VecDeque<Reading>,
    capacity: usize,
}

impl BoundedSeries {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn last(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// Pushes at the tail and returns how many readings were evicted from the head.
    pub fn append(&mut self, reading: Reading) -> usize {
        self.readings.push_back(reading);
        let overflow = self.readings.len().saturating_sub(self.capacity);
        self.readings.drain(..overflow);
        overflow
    }

    /// Discards all content and keeps the most recent `capacity` of `readings`,
    /// which are expected oldest-first.
    pub fn replace(&mut self, readings: Vec<Reading>) {
        let skip = readings.len().saturating_sub(self.capacity);
        self.readings.clear();
        self.readings.extend(readings.into_iter().skip(skip));
    }

    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}
