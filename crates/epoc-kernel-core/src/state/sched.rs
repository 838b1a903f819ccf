//! Quantum selection, yield and debugger suspension

use log::{debug, trace};

use super::KernelState;
use crate::error::{KernelError, KernelResult};
use crate::thread::ThreadState;
use crate::types::ThreadId;

impl KernelState {
    /// Pick the thread for the next quantum and mark it `Running`.
    ///
    /// Ends the previous quantum first. `None` means nothing is runnable
    /// (idle), which is not an error.
    pub fn select_next(&mut self) -> Option<ThreadId> {
        self.end_quantum();
        self.scheduler.reschedule = false;

        while let Some(tid) = self.scheduler.pick_next() {
            let Ok(t) = self.objects.thread_mut(tid) else {
                continue;
            };
            if !t.is_schedulable() {
                continue;
            }
            t.state = ThreadState::Running;
            t.stats.quanta += 1;
            self.scheduler.current = Some(tid);
            trace!("selected thread {} at priority {}", tid, t.priority);
            return Some(tid);
        }
        None
    }

    /// Close the quantum in progress. A thread still `Running` goes back to
    /// the tail of its level.
    pub fn end_quantum(&mut self) {
        let Some(tid) = self.scheduler.current.take() else {
            return;
        };
        let Ok(t) = self.objects.thread_mut(tid) else {
            return;
        };
        if t.state != ThreadState::Running {
            return;
        }
        t.state = ThreadState::Ready;
        if !t.suspended {
            let priority = t.priority;
            self.scheduler.enqueue(tid, priority);
        }
    }

    /// Cooperative yield by the running thread
    pub fn yield_current(&mut self) {
        if let Some(tid) = self.scheduler.current {
            trace!("thread {} yields", tid);
        }
        self.end_quantum();
    }

    /// Hold a thread back from scheduling (debugger breakpoints).
    ///
    /// A suspended thread keeps its state; it is simply never selected.
    pub fn suspend_thread(&mut self, tid: ThreadId) -> KernelResult<()> {
        let t = self.objects.thread_mut(tid)?;
        if t.state == ThreadState::Terminated {
            return Err(KernelError::InvalidThreadState {
                thread: tid,
                from: t.state,
                to: t.state,
            });
        }
        if t.suspended {
            return Ok(());
        }
        t.suspended = true;
        let (state, priority) = (t.state, t.priority);
        if state == ThreadState::Ready {
            self.scheduler.remove(tid, priority);
        }
        debug!("thread {} suspended", tid);
        Ok(())
    }

    /// Lift a debugger suspension; a ready thread rejoins its queue.
    ///
    /// Unlike `resume_thread` this never starts a `Created` thread.
    pub fn unsuspend(&mut self, tid: ThreadId) -> KernelResult<()> {
        let t = self.objects.thread_mut(tid)?;
        if !t.suspended {
            return Ok(());
        }
        t.suspended = false;
        let (state, priority) = (t.state, t.priority);
        if state == ThreadState::Ready {
            self.scheduler.enqueue(tid, priority);
        }
        debug!("thread {} resumed", tid);
        Ok(())
    }
}
