//! The execution loop: one quantum per tick

use epoc_hal::{ExecutionEngine, QuantumExit};
use epoc_kernel_core::{
    check_all_invariants, step, CallStatus, ExitInfo, KernelState, PageFault, ProcessId,
    ThreadId, ThreadState, VirtAddr,
};
use log::{error, info, trace, warn};

use super::KernelSystem;
use crate::error::SystemResult;
use crate::memory::ProcessMemory;

/// Result of one `tick`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing runnable. `next_deadline` is the earliest timed wait, if any.
    Idle { next_deadline: Option<u64> },
    Ran { thread: ThreadId, exit: RunExit },
}

/// How the quantum of the thread that ran ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunExit {
    /// Budget exhausted
    Preempted,
    Yielded,
    Call(CallStatus),
    /// Reserved memory was committed; the access is retried next quantum
    Paged,
    /// Unhandled fault; the thread (or its process) was terminated
    Faulted(PageFault),
    /// Breakpoint hit; the thread is suspended
    Breakpoint(VirtAddr),
    /// Undefined instruction; the thread (or its process) was terminated
    Crashed,
}

impl<E: ExecutionEngine> KernelSystem<E> {
    /// Run one quantum.
    ///
    /// Expired timed waits are woken first, then the most urgent ready thread
    /// runs until the engine returns. Engine failures other than guest errors
    /// are propagated.
    pub fn tick(&mut self) -> SystemResult<TickOutcome> {
        let now = self.engine.now_nanos();
        let mut state = self.state.write();

        for tid in state.expire_deadlines(now)? {
            trace!("thread {} timed out", tid);
        }

        let Some(tid) = state.select_next() else {
            return Ok(TickOutcome::Idle {
                next_deadline: state.scheduler.next_deadline(),
            });
        };
        let (pid, mut context) = {
            let t = state.objects.thread(tid)?;
            (t.process, t.context)
        };
        let live_before = live_threads(&state, pid);

        let result = {
            let mut memory = ProcessMemory::new(&mut state, pid);
            self.engine
                .run_quantum(tid, &mut context, &mut memory, self.config.quantum_budget)
        };
        if let Ok(t) = state.objects.thread_mut(tid) {
            t.context = context;
        }

        let exit = match result {
            Ok(QuantumExit::Completed) => {
                clear_fault_retry(&mut state, tid);
                RunExit::Preempted
            }
            Ok(QuantumExit::Yield) => {
                clear_fault_retry(&mut state, tid);
                state.yield_current();
                RunExit::Yielded
            }
            Ok(QuantumExit::KernelCall(call)) => {
                clear_fault_retry(&mut state, tid);
                let outcome = step(&mut state, tid, call, self.engine.now_nanos());
                RunExit::Call(outcome.status)
            }
            Ok(QuantumExit::Fault(fault)) => handle_fault(&mut state, tid, pid, fault)?,
            Ok(QuantumExit::Breakpoint(addr)) => {
                state.suspend_thread(tid)?;
                info!("thread {} hit breakpoint at {}", tid, addr);
                RunExit::Breakpoint(addr)
            }
            Err(e) if e.is_guest_error() => {
                warn!("thread {} crashed: {}", tid, e);
                state.panic_thread(tid, ExitInfo::exec_fault())?;
                RunExit::Crashed
            }
            Err(e) => {
                error!("engine failed running thread {}: {}", tid, e);
                return Err(e.into());
            }
        };

        for gone in live_before {
            let alive = state
                .objects
                .thread(gone)
                .is_ok_and(|t| t.state != ThreadState::Terminated);
            if !alive {
                self.engine.thread_exited(gone);
            }
        }

        if self.config.check_invariants {
            audit(&state);
        }
        self.ticks += 1;
        Ok(TickOutcome::Ran { thread: tid, exit })
    }

    /// Tick until nothing is runnable or `max_ticks` quanta have run.
    ///
    /// Returns the number of quanta run.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> SystemResult<u64> {
        let mut ran = 0;
        while ran < max_ticks {
            match self.tick()? {
                TickOutcome::Idle { .. } => break,
                TickOutcome::Ran { .. } => ran += 1,
            }
        }
        Ok(ran)
    }
}

/// Demand paging: commit and retry once, otherwise the thread dies
fn handle_fault(
    state: &mut KernelState,
    tid: ThreadId,
    pid: ProcessId,
    fault: PageFault,
) -> SystemResult<RunExit> {
    let retried = state
        .objects
        .thread(tid)
        .is_ok_and(|t| t.fault_retry == Some(fault.addr));
    let committed = !retried
        && match state.commit_for_fault(pid, &fault) {
            Ok(committed) => committed,
            Err(e) => {
                warn!("commit for fault at {} failed: {}", fault.addr, e);
                false
            }
        };

    if committed {
        state.objects.thread_mut(tid)?.fault_retry = Some(fault.addr);
        return Ok(RunExit::Paged);
    }
    state.fault_thread(tid, fault)?;
    Ok(RunExit::Faulted(fault))
}

fn clear_fault_retry(state: &mut KernelState, tid: ThreadId) {
    if let Ok(t) = state.objects.thread_mut(tid) {
        t.fault_retry = None;
    }
}

fn live_threads(state: &KernelState, pid: ProcessId) -> Vec<ThreadId> {
    let Ok(p) = state.objects.process(pid) else {
        return Vec::new();
    };
    p.threads
        .iter()
        .copied()
        .filter(|&t| {
            state
                .objects
                .thread(t)
                .is_ok_and(|t| t.state.is_live())
        })
        .collect()
}

fn audit(state: &KernelState) {
    let violations = check_all_invariants(state);
    for v in &violations {
        error!("invariant {} violated: {}", v.invariant, v.description);
    }
    debug_assert!(violations.is_empty(), "kernel invariants violated: {:?}", violations);
}
