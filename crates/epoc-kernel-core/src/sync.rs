//! Semaphore and mutex object bodies
//!
//! Wait queues are plain FIFOs. Wakers pick the waiter with the highest
//! effective priority, the earliest arrival winning ties, so the queue order
//! never has to be re-sorted when priorities change.

use alloc::collections::VecDeque;

use crate::types::ThreadId;

/// Counting semaphore
#[derive(Clone, Debug, Default)]
pub struct Semaphore {
    pub count: u32,
    pub waiters: VecDeque<ThreadId>,
}

impl Semaphore {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            waiters: VecDeque::new(),
        }
    }
}

/// Recursive mutex with priority inheritance
#[derive(Clone, Debug, Default)]
pub struct Mutex {
    pub owner: Option<ThreadId>,
    /// Nesting depth of the owner's holds
    pub hold_count: u32,
    pub waiters: VecDeque<ThreadId>,
}

/// Remove and return the best waiter given a priority lookup
pub fn take_best_waiter(
    waiters: &mut VecDeque<ThreadId>,
    priority_of: impl Fn(ThreadId) -> u8,
) -> Option<ThreadId> {
    let mut best: Option<(usize, u8)> = None;
    for (i, &tid) in waiters.iter().enumerate() {
        let p = priority_of(tid);
        if best.map_or(true, |(_, bp)| p > bp) {
            best = Some((i, p));
        }
    }
    best.and_then(|(i, _)| waiters.remove(i))
}

/// Remove one specific waiter, if queued
pub fn remove_waiter(waiters: &mut VecDeque<ThreadId>, tid: ThreadId) -> bool {
    match waiters.iter().position(|&w| w == tid) {
        Some(i) => {
            waiters.remove(i);
            true
        }
        None => false,
    }
}
