use std::collections::HashSet;

use crate::record::CancellationRecord;

/// How a cycle's resolved set compares to the previous cycle's, for logs and metrics only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChurnStats {
    pub total: usize,
    pub new: usize,
    pub repeated: usize,
}

/// Remembers the records resolved in the previous cycle.
#[derive(Debug, Default)]
pub struct ChurnTracker {
    previous: Vec<CancellationRecord>,
}

impl ChurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count how many of `current` belong to trips already seen in the previous cycle.
    /// Doesn't change the retained set, see `replace`.
    pub fn compare(&self, current: &[CancellationRecord]) -> ChurnStats {
        let seen: HashSet<&str> = self.previous.iter().map(|r| r.trip_id.as_str()).collect();
        let repeated = current
            .iter()
            .filter(|r| seen.contains(r.trip_id.as_str()))
            .count();

        ChurnStats {
            total: current.len(),
            new: current.len() - repeated,
            repeated,
        }
    }

    /// Retain `current` as the previous cycle's set, whatever it contains.
    pub fn replace(&mut self, current: Vec<CancellationRecord>) {
        self.previous = current;
    }

    pub fn retained(&self) -> &[CancellationRecord] {
        &self.previous
    }
}
