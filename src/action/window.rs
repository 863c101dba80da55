//! Sliding window of the most recent pose observations.

use std::collections::VecDeque;

use crate::pose::PoseObservation;

/// Number of frames the action classifier looks at.
pub const WINDOW_CAPACITY: usize = 60;

/// Fixed-capacity FIFO of pose observations, oldest first.
///
/// Pushing into a full window evicts the oldest observation before the new
/// one is appended, so `len() <= capacity()` always holds.
#[derive(Debug, Clone)]
pub struct PoseWindow {
    frames: VecDeque<PoseObservation>,
    capacity: usize,
}

impl PoseWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, observation: PoseObservation) {
        if self.capacity == 0 {
            return;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(observation);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Observations in arrival order, oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &PoseObservation> + '_ {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

impl Default for PoseWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}
