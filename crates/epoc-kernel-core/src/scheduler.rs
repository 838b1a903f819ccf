//! Priority ready queues
//!
//! Policy: 64 fixed priority levels, higher number is more urgent. Selection
//! is strict priority; within one level threads run in FIFO order and a
//! thread that finishes or gives up its quantum rejoins the tail of its level.
//!
//! The queues only hold `Ready`, unsuspended threads. The running thread is
//! tracked separately in `current`.

use alloc::collections::{BTreeSet, VecDeque};

use crate::types::{ThreadId, NUM_PRIORITIES};

pub struct Scheduler {
    queues: [VecDeque<ThreadId>; NUM_PRIORITIES],
    /// Thread handed to the engine for the quantum in progress
    pub current: Option<ThreadId>,
    /// Timed waits ordered by deadline
    deadlines: BTreeSet<(u64, ThreadId)>,
    /// A woken thread outranks the running one
    pub reschedule: bool,
    ready_count: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            current: None,
            deadlines: BTreeSet::new(),
            reschedule: false,
            ready_count: 0,
        }
    }

    /// Append to the tail of a priority level
    pub fn enqueue(&mut self, tid: ThreadId, priority: u8) {
        let level = (priority as usize).min(NUM_PRIORITIES - 1);
        self.queues[level].push_back(tid);
        self.ready_count += 1;
    }

    /// Remove from the given level; false if it was not queued there
    pub fn remove(&mut self, tid: ThreadId, priority: u8) -> bool {
        let level = (priority as usize).min(NUM_PRIORITIES - 1);
        let queue = &mut self.queues[level];
        match queue.iter().position(|&t| t == tid) {
            Some(i) => {
                queue.remove(i);
                self.ready_count -= 1;
                true
            }
            None => false,
        }
    }

    /// Pop the head of the most urgent non-empty level
    pub fn pick_next(&mut self) -> Option<ThreadId> {
        let tid = self
            .queues
            .iter_mut()
            .rev()
            .find_map(|q| q.pop_front())?;
        self.ready_count -= 1;
        Some(tid)
    }

    /// Highest level with a queued thread
    pub fn highest_ready(&self) -> Option<u8> {
        self.queues
            .iter()
            .rposition(|q| !q.is_empty())
            .map(|level| level as u8)
    }

    pub fn is_queued(&self, tid: ThreadId) -> bool {
        self.queues.iter().any(|q| q.contains(&tid))
    }

    /// Level at which `tid` is queued
    pub fn queued_level(&self, tid: ThreadId) -> Option<u8> {
        self.queues
            .iter()
            .position(|q| q.contains(&tid))
            .map(|level| level as u8)
    }

    pub fn ready_count(&self) -> usize {
        self.ready_count
    }

    /// Queued threads, most urgent first
    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queues.iter().rev().flat_map(|q| q.iter().copied())
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    pub fn add_deadline(&mut self, deadline: u64, tid: ThreadId) {
        self.deadlines.insert((deadline, tid));
    }

    pub fn remove_deadline(&mut self, deadline: u64, tid: ThreadId) {
        self.deadlines.remove(&(deadline, tid));
    }

    /// Remove and return every wait whose deadline is at or before `now`
    pub fn take_expired(&mut self, now: u64) -> alloc::vec::Vec<ThreadId> {
        let mut expired = alloc::vec::Vec::new();
        while let Some(&(deadline, tid)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, tid));
            expired.push(tid);
        }
        expired
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.first().map(|&(d, _)| d)
    }

    pub fn has_deadline(&self, tid: ThreadId) -> bool {
        self.deadlines.iter().any(|&(_, t)| t == tid)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    #[test]
    fn test_strict_priority() {
        let mut s = Scheduler::new();
        s.enqueue(ObjectId(1), 10);
        s.enqueue(ObjectId(2), 40);
        s.enqueue(ObjectId(3), 20);

        assert_eq!(s.highest_ready(), Some(40));
        assert_eq!(s.pick_next(), Some(ObjectId(2)));
        assert_eq!(s.pick_next(), Some(ObjectId(3)));
        assert_eq!(s.pick_next(), Some(ObjectId(1)));
        assert_eq!(s.pick_next(), None);
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn test_fifo_within_level() {
        let mut s = Scheduler::new();
        for i in 1..=3 {
            s.enqueue(ObjectId(i), 15);
        }
        let first = s.pick_next().unwrap();
        s.enqueue(first, 15);
        assert_eq!(s.pick_next(), Some(ObjectId(2)));
        assert_eq!(s.pick_next(), Some(ObjectId(3)));
        assert_eq!(s.pick_next(), Some(ObjectId(1)));
    }

    #[test]
    fn test_remove() {
        let mut s = Scheduler::new();
        s.enqueue(ObjectId(1), 5);
        assert!(!s.remove(ObjectId(1), 6));
        assert!(s.remove(ObjectId(1), 5));
        assert!(!s.is_queued(ObjectId(1)));
        assert_eq!(s.ready_count(), 0);
    }

    #[test]
    fn test_deadlines_expire_in_order() {
        let mut s = Scheduler::new();
        s.add_deadline(300, ObjectId(3));
        s.add_deadline(100, ObjectId(1));
        s.add_deadline(200, ObjectId(2));

        assert_eq!(s.next_deadline(), Some(100));
        assert_eq!(s.take_expired(250), [ObjectId(1), ObjectId(2)]);
        assert!(s.has_deadline(ObjectId(3)));
        s.remove_deadline(300, ObjectId(3));
        assert!(s.take_expired(1000).is_empty());
    }
}
