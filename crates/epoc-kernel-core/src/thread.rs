//! Thread objects
//!
//! State machine:
//!
//! ```text
//! Created ──▶ Ready ◀──▶ Running ──▶ Blocked
//!    │          ▲ │         │           │
//!    │          │ └─────────┼───────────┤
//!    │          └───────────┼───────────┘ (wake)
//!    ▼                      ▼
//! Terminated ◀──────────────┘ (exit / kill, from any live state)
//! ```
//!
//! `Terminated` is terminal.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::process::ExitInfo;
use crate::types::{ObjectId, ProcessId, ThreadContext, ThreadId, VirtAddr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadState {
    Created,
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl ThreadState {
    pub fn can_transition(self, to: ThreadState) -> bool {
        use ThreadState::*;
        matches!(
            (self, to),
            (Created, Ready)
                | (Created, Terminated)
                | (Ready, Running)
                | (Ready, Blocked)
                | (Ready, Terminated)
                | (Running, Ready)
                | (Running, Blocked)
                | (Running, Terminated)
                | (Blocked, Ready)
                | (Blocked, Terminated)
        )
    }

    /// Started and not yet terminated
    pub fn is_live(self) -> bool {
        !matches!(self, ThreadState::Created | ThreadState::Terminated)
    }
}

/// What a blocked thread is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitReason {
    Semaphore,
    Mutex,
    Sleep,
    Generic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitInfo {
    pub reason: WaitReason,
    /// Object whose wait queue holds the thread
    pub object: Option<ObjectId>,
    /// Nanosecond deadline for timed waits
    pub deadline: Option<u64>,
}

/// Per-thread counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStats {
    pub quanta: u64,
    pub kernel_calls: u64,
    pub faults: u64,
}

#[derive(Clone, Debug)]
pub struct Thread {
    pub process: ProcessId,
    pub context: ThreadContext,
    pub base_priority: u8,
    /// Base priority raised by inheritance
    pub priority: u8,
    pub state: ThreadState,
    pub wait: Option<WaitInfo>,
    /// Mutexes this thread owns
    pub held_mutexes: Vec<ObjectId>,
    /// Held back from scheduling by the debugger
    pub suspended: bool,
    pub is_primary: bool,
    pub exit: Option<ExitInfo>,
    pub stats: ThreadStats,
    /// Stack region base
    pub stack: Option<VirtAddr>,
    /// Address of a demand-commit retry in flight
    pub fault_retry: Option<VirtAddr>,
}

impl Thread {
    pub fn new(process: ProcessId, context: ThreadContext, priority: u8, is_primary: bool) -> Self {
        Self {
            process,
            context,
            base_priority: priority,
            priority,
            state: ThreadState::Created,
            wait: None,
            held_mutexes: Vec::new(),
            suspended: false,
            is_primary,
            exit: None,
            stats: ThreadStats::default(),
            stack: None,
            fault_retry: None,
        }
    }

    /// Checked state change
    pub fn transition(&mut self, id: ThreadId, to: ThreadState) -> KernelResult<()> {
        if !self.state.can_transition(to) {
            return Err(KernelError::InvalidThreadState {
                thread: id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Eligible for the ready queues
    pub fn is_schedulable(&self) -> bool {
        self.state == ThreadState::Ready && !self.suspended
    }
}
