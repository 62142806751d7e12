//! Retry timer queue.
//!
//! One deadline per packet identifier, ordered by expiry. Arming an
//! identifier that already has a deadline replaces it.

use std::collections::BTreeSet;
use std::time::Instant;

use ahash::AHashMap;

#[derive(Debug, Default)]
pub struct RetryTimers {
    queue: BTreeSet<(Instant, u16)>,
    deadlines: AHashMap<u16, Instant>,
}

impl RetryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for `packet_id`.
    pub fn arm(&mut self, packet_id: u16, deadline: Instant) {
        if let Some(old) = self.deadlines.insert(packet_id, deadline) {
            self.queue.remove(&(old, packet_id));
        }
        self.queue.insert((deadline, packet_id));
    }

    /// Cancel the timer for `packet_id`. Returns false if none was armed.
    pub fn cancel(&mut self, packet_id: u16) -> bool {
        match self.deadlines.remove(&packet_id) {
            Some(deadline) => {
                self.queue.remove(&(deadline, packet_id));
                true
            }
            None => false,
        }
    }

    /// Remove and return every identifier whose deadline is at or before
    /// `now`, earliest first.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<u16> {
        let mut expired = Vec::new();
        while let Some(&(deadline, packet_id)) = self.queue.first() {
            if deadline > now {
                break;
            }
            self.queue.pop_first();
            self.deadlines.remove(&packet_id);
            expired.push(packet_id);
        }
        expired
    }

    pub fn deadline(&self, packet_id: u16) -> Option<Instant> {
        self.deadlines.get(&packet_id).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|&(deadline, _)| deadline)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }
}
