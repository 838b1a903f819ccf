//! Blocking, waking and synchronisation objects
//!
//! A blocked thread holds one reference on the object whose wait queue it
//! sits in, so the object outlives every waiter. Waiting on an object that
//! is already signalled acquires it at once and never visits `Blocked`.
//!
//! Mutex owners inherit the effective priority of their waiters. The boost
//! follows ownership chains (a waiter's owner may itself be waiting on
//! another mutex) up to `MAX_INHERITANCE_DEPTH` links.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use log::{debug, trace};

use super::{KernelState, WaitOutcome};
use crate::error::{guest, KernelError, KernelResult};
use crate::object::ObjectBody;
use crate::sync::{remove_waiter, take_best_waiter};
use crate::thread::{ThreadState, WaitInfo, WaitReason};
use crate::types::{ObjectId, ObjectKind, ThreadId};

const MAX_INHERITANCE_DEPTH: usize = 16;

impl KernelState {
    /// Block `tid` on `object` (or on nothing, for sleeps and generic waits).
    ///
    /// Semaphores and mutexes that can be taken immediately are taken and
    /// `Acquired` is returned.
    pub fn block(
        &mut self,
        tid: ThreadId,
        reason: WaitReason,
        object: Option<ObjectId>,
        deadline: Option<u64>,
    ) -> KernelResult<WaitOutcome> {
        let Some(obj) = object else {
            self.park(
                tid,
                WaitInfo {
                    reason,
                    object: None,
                    deadline,
                },
            )?;
            return Ok(WaitOutcome::Blocked);
        };
        match self.objects.kind_of(obj)? {
            ObjectKind::Semaphore => self.semaphore_wait(tid, obj, deadline),
            ObjectKind::Mutex => self.mutex_wait(tid, obj, deadline),
            _ => {
                self.park(
                    tid,
                    WaitInfo {
                        reason,
                        object: Some(obj),
                        deadline,
                    },
                )?;
                Ok(WaitOutcome::Blocked)
            }
        }
    }

    /// Move a running or ready thread to `Blocked`
    fn park(&mut self, tid: ThreadId, wait: WaitInfo) -> KernelResult<()> {
        let t = self.objects.thread_mut(tid)?;
        let prev = t.state;
        t.transition(tid, ThreadState::Blocked)?;
        t.wait = Some(wait);
        let priority = t.priority;
        if let Some(obj) = wait.object {
            self.retain(obj)?;
        }

        if prev == ThreadState::Ready {
            self.scheduler.remove(tid, priority);
        }
        if let Some(deadline) = wait.deadline {
            self.scheduler.add_deadline(deadline, tid);
        }
        trace!("thread {} blocked on {:?}", tid, wait.reason);
        Ok(())
    }

    /// Make a blocked thread ready, storing `result` in its r0.
    ///
    /// Returns true when the woken thread outranks the running one; the next
    /// selection then picks it.
    pub fn wake(&mut self, tid: ThreadId, result: i32) -> KernelResult<bool> {
        let t = self.objects.thread(tid)?;
        if t.state != ThreadState::Blocked {
            return Err(KernelError::InvalidThreadState {
                thread: tid,
                from: t.state,
                to: ThreadState::Ready,
            });
        }
        let wait = t.wait;
        let object = self.detach_wait(tid, wait)?;

        let t = self.objects.thread_mut(tid)?;
        t.transition(tid, ThreadState::Ready)?;
        t.wait = None;
        t.context.set_return(result);
        let (priority, schedulable) = (t.priority, t.is_schedulable());
        if schedulable {
            self.scheduler.enqueue(tid, priority);
        }
        if let Some(obj) = object {
            self.release(obj)?;
        }

        let preempt = schedulable && self.outranks_current(priority);
        if preempt {
            self.scheduler.reschedule = true;
        }
        debug!("thread {} woken ({}){}", tid, result, if preempt { ", preempting" } else { "" });
        Ok(preempt)
    }

    fn outranks_current(&self, priority: u8) -> bool {
        self.scheduler
            .current
            .and_then(|c| self.objects.thread(c).ok())
            .is_some_and(|c| c.state == ThreadState::Running && priority > c.priority)
    }

    /// Take a thread out of whatever it waits on and return the object whose
    /// wait reference the caller must release
    pub(crate) fn detach_wait(
        &mut self,
        tid: ThreadId,
        wait: Option<WaitInfo>,
    ) -> KernelResult<Option<ObjectId>> {
        let Some(wait) = wait else {
            return Ok(None);
        };
        if let Some(deadline) = wait.deadline {
            self.scheduler.remove_deadline(deadline, tid);
        }
        if let Some(obj) = wait.object {
            if let Ok(queue) = self.waiters_mut(obj) {
                remove_waiter(queue, tid);
            }
            if wait.reason == WaitReason::Mutex {
                if let Some(owner) = self.objects.mutex(obj).ok().and_then(|m| m.owner) {
                    self.refresh_priority(owner);
                }
            }
        }
        Ok(wait.object)
    }

    fn waiters_mut(&mut self, object: ObjectId) -> KernelResult<&mut VecDeque<ThreadId>> {
        let obj = self
            .objects
            .get_mut(object)
            .ok_or(KernelError::ObjectNotFound(object))?;
        let found = obj.kind();
        match &mut obj.body {
            ObjectBody::Semaphore(s) => Ok(&mut s.waiters),
            ObjectBody::Mutex(m) => Ok(&mut m.waiters),
            _ => Err(KernelError::WrongObjectType {
                object,
                expected: ObjectKind::Semaphore,
                found,
            }),
        }
    }

    /// Remove the highest-priority, longest-waiting thread from a queue
    fn pop_best_waiter(&mut self, object: ObjectId) -> KernelResult<Option<ThreadId>> {
        let mut waiters = core::mem::take(self.waiters_mut(object)?);
        let objects = &self.objects;
        let best = take_best_waiter(&mut waiters, |t| {
            objects.thread(t).map(|t| t.priority).unwrap_or(0)
        });
        *self.waiters_mut(object)? = waiters;
        Ok(best)
    }

    // ========================================================================
    // Semaphores
    // ========================================================================

    pub fn semaphore_wait(
        &mut self,
        tid: ThreadId,
        sem: ObjectId,
        deadline: Option<u64>,
    ) -> KernelResult<WaitOutcome> {
        let s = self.objects.semaphore_mut(sem)?;
        if s.count > 0 {
            s.count -= 1;
            return Ok(WaitOutcome::Acquired);
        }
        self.park(
            tid,
            WaitInfo {
                reason: WaitReason::Semaphore,
                object: Some(sem),
                deadline,
            },
        )?;
        self.objects.semaphore_mut(sem)?.waiters.push_back(tid);
        Ok(WaitOutcome::Blocked)
    }

    /// Signal `count` times: wake waiters first, then bank the remainder
    pub fn semaphore_signal(&mut self, sem: ObjectId, count: u32) -> KernelResult<bool> {
        let mut preempt = false;
        let mut remaining = count;
        while remaining > 0 {
            let Some(waiter) = self.pop_best_waiter(sem)? else {
                break;
            };
            preempt |= self.wake(waiter, guest::KERR_NONE)?;
            remaining -= 1;
        }
        if remaining > 0 {
            let s = self.objects.semaphore_mut(sem)?;
            s.count = s.count.checked_add(remaining).ok_or(KernelError::Overflow)?;
        }
        Ok(preempt)
    }

    // ========================================================================
    // Mutexes
    // ========================================================================

    pub fn mutex_wait(
        &mut self,
        tid: ThreadId,
        mutex: ObjectId,
        deadline: Option<u64>,
    ) -> KernelResult<WaitOutcome> {
        let m = self.objects.mutex_mut(mutex)?;
        let owner = m.owner;
        match owner {
            None => {
                m.owner = Some(tid);
                m.hold_count = 1;
                self.objects.thread_mut(tid)?.held_mutexes.push(mutex);
                Ok(WaitOutcome::Acquired)
            }
            Some(owner) if owner == tid => {
                m.hold_count = m.hold_count.checked_add(1).ok_or(KernelError::Overflow)?;
                Ok(WaitOutcome::Acquired)
            }
            Some(owner) => {
                self.park(
                    tid,
                    WaitInfo {
                        reason: WaitReason::Mutex,
                        object: Some(mutex),
                        deadline,
                    },
                )?;
                self.objects.mutex_mut(mutex)?.waiters.push_back(tid);
                self.refresh_priority(owner);
                Ok(WaitOutcome::Blocked)
            }
        }
    }

    /// Release one hold. The last hold hands ownership straight to the best
    /// waiter.
    pub fn mutex_signal(&mut self, tid: ThreadId, mutex: ObjectId) -> KernelResult<bool> {
        let m = self.objects.mutex_mut(mutex)?;
        if m.owner != Some(tid) {
            return Err(KernelError::NotOwner { thread: tid, mutex });
        }
        m.hold_count -= 1;
        if m.hold_count > 0 {
            return Ok(false);
        }
        m.owner = None;
        self.hand_over(tid, mutex)
    }

    /// Drop every hold `tid` has on `mutex` (owner terminating)
    pub(crate) fn abandon_mutex(&mut self, tid: ThreadId, mutex: ObjectId) -> KernelResult<()> {
        let Ok(m) = self.objects.mutex_mut(mutex) else {
            return Ok(());
        };
        if m.owner != Some(tid) {
            return Ok(());
        }
        m.owner = None;
        m.hold_count = 0;
        self.hand_over(tid, mutex).map(|_| ())
    }

    fn hand_over(&mut self, prev: ThreadId, mutex: ObjectId) -> KernelResult<bool> {
        if let Ok(t) = self.objects.thread_mut(prev) {
            t.held_mutexes.retain(|&m| m != mutex);
        }

        let next = self.pop_best_waiter(mutex)?;
        let mut preempt = false;
        if let Some(waiter) = next {
            let m = self.objects.mutex_mut(mutex)?;
            m.owner = Some(waiter);
            m.hold_count = 1;
            self.objects.thread_mut(waiter)?.held_mutexes.push(mutex);
            preempt = self.wake(waiter, guest::KERR_NONE)?;
        }

        self.refresh_priority(prev);
        if let Some(waiter) = next {
            self.refresh_priority(waiter);
        }
        Ok(preempt)
    }

    // ========================================================================
    // Priorities
    // ========================================================================

    /// Change a thread's base priority
    pub fn set_priority(&mut self, tid: ThreadId, priority: u8) -> KernelResult<()> {
        Self::check_priority(priority)?;
        let t = self.objects.thread_mut(tid)?;
        if t.state == ThreadState::Terminated {
            return Err(KernelError::InvalidThreadState {
                thread: tid,
                from: t.state,
                to: t.state,
            });
        }
        t.base_priority = priority;
        self.refresh_priority(tid);
        Ok(())
    }

    /// Base priority raised to the best waiter on any mutex the thread holds
    fn inherited_priority(&self, tid: ThreadId) -> Option<u8> {
        let t = self.objects.thread(tid).ok()?;
        let mut priority = t.base_priority;
        for &m in &t.held_mutexes {
            let Ok(mutex) = self.objects.mutex(m) else {
                continue;
            };
            for &w in &mutex.waiters {
                if let Ok(waiter) = self.objects.thread(w) {
                    priority = priority.max(waiter.priority);
                }
            }
        }
        Some(priority)
    }

    /// Recompute effective priority and push changes along the chain of
    /// mutex owners this thread is waiting behind
    pub(crate) fn refresh_priority(&mut self, start: ThreadId) {
        let mut tid = start;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let Some(new) = self.inherited_priority(tid) else {
                return;
            };
            let Ok(t) = self.objects.thread(tid) else {
                return;
            };
            if t.priority == new {
                return;
            }
            let next = match t.wait {
                Some(WaitInfo {
                    reason: WaitReason::Mutex,
                    object: Some(m),
                    ..
                }) => self.objects.mutex(m).ok().and_then(|m| m.owner),
                _ => None,
            };
            self.set_effective_priority(tid, new);
            match next {
                Some(owner) if owner != start => tid = owner,
                _ => return,
            }
        }
    }

    fn set_effective_priority(&mut self, tid: ThreadId, priority: u8) {
        let Ok(t) = self.objects.thread_mut(tid) else {
            return;
        };
        let old = t.priority;
        t.priority = priority;
        let queued = t.is_schedulable();
        trace!("thread {} priority {} -> {}", tid, old, priority);

        if queued && self.scheduler.remove(tid, old) {
            self.scheduler.enqueue(tid, priority);
            if self.outranks_current(priority) {
                self.scheduler.reschedule = true;
            }
        }
    }

    // ========================================================================
    // Deadlines
    // ========================================================================

    /// Force-wake every timed wait due at `now`.
    ///
    /// Sleeps complete with `KErrNone`, object waits with `KErrTimedOut`.
    pub fn expire_deadlines(&mut self, now: u64) -> KernelResult<Vec<ThreadId>> {
        let expired = self.scheduler.take_expired(now);
        let mut woken = Vec::with_capacity(expired.len());
        for tid in expired {
            let Ok(t) = self.objects.thread(tid) else {
                continue;
            };
            if t.state != ThreadState::Blocked {
                continue;
            }
            let code = match t.wait.map(|w| w.reason) {
                Some(WaitReason::Sleep) => guest::KERR_NONE,
                _ => guest::KERR_TIMED_OUT,
            };
            self.wake(tid, code)?;
            woken.push(tid);
        }
        Ok(woken)
    }
}
