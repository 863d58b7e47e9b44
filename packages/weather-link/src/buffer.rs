// Bounded ring buffer of recent readings
//
// Feeds the predictor's rolling window and any "recent history" display.
// When full, the oldest reading is evicted to make room for the newest one.
// The buffer itself is not synchronized; the connection manager keeps it
// behind its own lock.

use crate::types::Reading;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Counters for buffer monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub total_pushed: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct ReadingBuffer {
    readings: VecDeque<Reading>,
    capacity: usize,
    total_pushed: u64,
    total_evicted: u64,
}

impl ReadingBuffer {
    /// Create a buffer holding at most `capacity` readings (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
            total_evicted: 0,
        }
    }

    /// Append a reading, returning the evicted oldest one if the buffer was full
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = if self.readings.len() == self.capacity {
            self.total_evicted += 1;
            self.readings.pop_front()
        } else {
            None
        };

        self.readings.push_back(reading);
        self.total_pushed += 1;
        evicted
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    /// All readings, oldest to newest
    pub fn snapshot(&self) -> Vec<Reading> {
        self.readings.iter().copied().collect()
    }

    /// Up to `count` newest readings, oldest to newest
    pub fn recent(&self, count: usize) -> Vec<Reading> {
        let skip = self.readings.len().saturating_sub(count);
        self.readings.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.readings.clear();
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            total_pushed: self.total_pushed,
            total_evicted: self.total_evicted,
            current_size: self.readings.len(),
            capacity: self.capacity,
        }
    }
}
