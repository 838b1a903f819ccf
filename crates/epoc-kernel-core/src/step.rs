//! Kernel-call dispatcher
//!
//! `step(state, thread, call, now)` executes one decoded kernel call on
//! behalf of a guest thread. Like every other core operation it is pure: the
//! state is mutated in place and the outcome tells the runtime what happened
//! to the caller.
//!
//! # Results
//!
//! The guest sees the result in r0: a handle, an address or a value on
//! success, a negative `KErr*` code on failure. A call that blocks gets its
//! r0 when it is woken (`KErrNone`, or `KErrTimedOut` when a deadline fires).
//!
//! # Time
//!
//! `now` is in nanoseconds, the unit of every scheduler deadline. Guest-facing
//! times and timeouts are in microseconds.

use alloc::string::String;

use log::{debug, trace};

use crate::error::{guest, KernelError, KernelResult};
use crate::handle::{HandleAttrs, HandleOrigin, HandleOwner, OwnerType};
use crate::memory::{Protection, RegionKind};
use crate::process::{ExitInfo, ProcessState};
use crate::state::{KernelState, WaitOutcome};
use crate::thread::{ThreadState, WaitReason};
use crate::types::{Handle, ObjectId, ObjectKind, ProcessId, ThreadId, VirtAddr};

// ============================================================================
// Kernel call definitions
// ============================================================================

/// Kernel calls, as decoded by the execution engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelCall {
    /// End the quantum early
    Yield,

    /// Terminate the calling thread
    ExitThread { reason: i32 },

    /// Terminate the calling process
    ExitProcess { reason: i32 },

    /// Kill another thread of the calling process
    KillThread { thread: Handle, reason: i32 },

    /// Block for at least `micros` microseconds
    Sleep { micros: u32 },

    /// Microseconds since boot: low word in r0, high word in r1
    GetTime,

    CreateSemaphore { initial: u32, owner: OwnerType },

    /// `Some(0)` polls without blocking
    SemaphoreWait {
        semaphore: Handle,
        timeout_micros: Option<u32>,
    },

    SemaphoreSignal { semaphore: Handle, count: u32 },

    CreateMutex { owner: OwnerType },

    MutexWait { mutex: Handle },

    MutexSignal { mutex: Handle },

    /// Global shared chunk; sizes are rounded up to pages
    CreateChunk {
        max_size: u32,
        committed: u32,
        owner: OwnerType,
    },

    /// Map a chunk into the caller's address space, returning its base
    MapChunk {
        chunk: Handle,
        address: Option<VirtAddr>,
        protection: Protection,
    },

    /// Unmap a shared-chunk mapping; private regions cannot be unmapped
    UnmapChunk { address: VirtAddr, size: u32 },

    AdjustChunk { chunk: Handle, size: u32 },

    /// Create a thread in the calling process, suspended until resumed
    CreateThread {
        name: String,
        entry: VirtAddr,
        stack_size: u32,
        priority: Option<u8>,
        arg: u32,
    },

    ResumeThread { thread: Handle },

    SetThreadPriority { thread: Handle, priority: u8 },

    CloseHandle { handle: Handle },

    /// Open a handle in `target_process` to what `handle` names here
    DuplicateHandle {
        handle: Handle,
        target_process: Handle,
        owner: OwnerType,
    },

    /// Read one of the caller's argument slots: data in r0, size in r1
    GetArgSlot { slot: u8 },

    /// Fill an argument slot of a process that has not been run yet
    SetProcessArgSlot {
        process: Handle,
        slot: u8,
        data: u32,
        size: usize,
    },
}

// ============================================================================
// Call outcomes
// ============================================================================

/// What happened to the calling thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    /// Completed; the value is also in r0
    Returned(i32),
    /// The caller waits; r0 is written when it wakes
    Blocked,
    /// The caller no longer exists as a runnable thread
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: CallStatus,
    /// The caller should give up the CPU: it yielded, blocked, died, or a
    /// more urgent thread became ready
    pub reschedule: bool,
}

/// Successful handler result, before it is written back to the caller
enum Reply {
    Value(i32),
    Pair(u32, u32),
    Blocked,
}

impl From<WaitOutcome> for Reply {
    fn from(outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::Acquired => Reply::Value(guest::KERR_NONE),
            WaitOutcome::Blocked => Reply::Blocked,
        }
    }
}

// ============================================================================
// The step function
// ============================================================================

/// Execute a kernel call for `thread`.
///
/// Failures never escape as errors: they become a negative code in the
/// caller's r0, which is what guest code expects.
pub fn step(state: &mut KernelState, thread: ThreadId, call: KernelCall, now: u64) -> CallOutcome {
    let process = match state.objects.thread_mut(thread) {
        Ok(t) => {
            t.stats.kernel_calls += 1;
            t.process
        }
        Err(e) => {
            return CallOutcome {
                status: CallStatus::Returned(e.guest_code()),
                reschedule: true,
            }
        }
    };
    trace!("thread {} kernel call {:?}", thread, call);

    let reply = dispatch(state, thread, process, call, now);

    let caller_alive = state
        .objects
        .thread(thread)
        .is_ok_and(|t| t.state != ThreadState::Terminated);
    let status = if !caller_alive {
        CallStatus::Terminated
    } else {
        match reply {
            Ok(Reply::Blocked) => CallStatus::Blocked,
            Ok(Reply::Value(v)) => write_back(state, thread, v as u32, None),
            Ok(Reply::Pair(lo, hi)) => write_back(state, thread, lo, Some(hi)),
            Err(e) => {
                debug!("kernel call from {} failed: {}", thread, e);
                write_back(state, thread, e.guest_code() as u32, None)
            }
        }
    };

    CallOutcome {
        status,
        reschedule: state.scheduler.reschedule || !matches!(status, CallStatus::Returned(_)),
    }
}

fn write_back(state: &mut KernelState, thread: ThreadId, r0: u32, r1: Option<u32>) -> CallStatus {
    if let Ok(t) = state.objects.thread_mut(thread) {
        t.context.regs[0] = r0;
        if let Some(r1) = r1 {
            t.context.regs[1] = r1;
        }
    }
    CallStatus::Returned(r0 as i32)
}

fn dispatch(
    state: &mut KernelState,
    thread: ThreadId,
    process: ProcessId,
    call: KernelCall,
    now: u64,
) -> KernelResult<Reply> {
    match call {
        KernelCall::Yield => {
            state.scheduler.reschedule = true;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::ExitThread { reason } => {
            state.terminate_thread(thread, ExitInfo::kill(reason))?;
            Ok(Reply::Blocked)
        }
        KernelCall::ExitProcess { reason } => {
            state.terminate_process(process, ExitInfo::kill(reason))?;
            Ok(Reply::Blocked)
        }
        KernelCall::KillThread { thread: target, reason } => {
            step_kill_thread(state, thread, process, target, reason)
        }
        KernelCall::Sleep { micros } => step_sleep(state, thread, micros, now),
        KernelCall::GetTime => {
            let micros = now / 1_000;
            Ok(Reply::Pair(micros as u32, (micros >> 32) as u32))
        }
        KernelCall::CreateSemaphore { initial, owner } => {
            let id = state.create_semaphore(String::new(), initial);
            adopt(state, thread, process, id, owner)
        }
        KernelCall::SemaphoreWait {
            semaphore,
            timeout_micros,
        } => step_semaphore_wait(state, thread, semaphore, timeout_micros, now),
        KernelCall::SemaphoreSignal { semaphore, count } => {
            let sem = state.resolve_typed(thread, semaphore, ObjectKind::Semaphore)?;
            state.semaphore_signal(sem, count)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::CreateMutex { owner } => {
            let id = state.create_mutex(String::new());
            adopt(state, thread, process, id, owner)
        }
        KernelCall::MutexWait { mutex } => {
            let m = state.resolve_typed(thread, mutex, ObjectKind::Mutex)?;
            state.mutex_wait(thread, m, None).map(Reply::from)
        }
        KernelCall::MutexSignal { mutex } => {
            let m = state.resolve_typed(thread, mutex, ObjectKind::Mutex)?;
            state.mutex_signal(thread, m)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::CreateChunk {
            max_size,
            committed,
            owner,
        } => {
            let id = state.create_chunk(String::new(), max_size, committed)?;
            adopt(state, thread, process, id, owner)
        }
        KernelCall::MapChunk {
            chunk,
            address,
            protection,
        } => {
            let c = state.resolve_typed(thread, chunk, ObjectKind::Chunk)?;
            let base = state.map_chunk(process, c, address, protection)?;
            Ok(Reply::Value(base.0 as i32))
        }
        KernelCall::UnmapChunk { address, size } => {
            // Every byte of the range must belong to a shared-chunk mapping
            match state.objects.process(process)?.page_table.covering(address, size) {
                Ok(regions) if regions.iter().all(|r| r.kind == RegionKind::SharedChunk) => {}
                Ok(_) | Err(KernelError::NotMapped { .. }) => {
                    return Err(KernelError::AccessDenied)
                }
                Err(e) => return Err(e),
            }
            state.unmap(process, address, size)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::AdjustChunk { chunk, size } => {
            let c = state.resolve_typed(thread, chunk, ObjectKind::Chunk)?;
            state.adjust_chunk(c, size)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::CreateThread {
            name,
            entry,
            stack_size,
            priority,
            arg,
        } => {
            let priority = priority.unwrap_or(state.limits.default_priority);
            let tid = state.create_thread(process, &name, entry, stack_size, priority, arg)?;
            adopt(state, thread, process, tid, OwnerType::Process)
        }
        KernelCall::ResumeThread { thread: target } => {
            let t = state.resolve_typed(thread, target, ObjectKind::Thread)?;
            state.resume_thread(t)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::SetThreadPriority {
            thread: target,
            priority,
        } => {
            let t = state.resolve_typed(thread, target, ObjectKind::Thread)?;
            state.set_priority(t, priority)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::CloseHandle { handle } => {
            state.close_handle(process, handle)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        KernelCall::DuplicateHandle {
            handle,
            target_process,
            owner,
        } => step_duplicate(state, thread, process, handle, target_process, owner),
        KernelCall::GetArgSlot { slot } => {
            match state.objects.process(process)?.get_arg_slot(slot)? {
                Some(arg) => Ok(Reply::Pair(arg.data, arg.size as u32)),
                None => Err(KernelError::ObjectNotFound(process)),
            }
        }
        KernelCall::SetProcessArgSlot {
            process: target,
            slot,
            data,
            size,
        } => {
            let pid = state.resolve_typed(thread, target, ObjectKind::Process)?;
            let p = state.objects.process_mut(pid)?;
            if p.state != ProcessState::Created {
                return Err(KernelError::AccessDenied);
            }
            p.set_arg_slot(slot, data, size)?;
            Ok(Reply::Value(guest::KERR_NONE))
        }
    }
}

// ============================================================================
// Call handlers
// ============================================================================

/// Give a freshly created object's reference to a new handle
fn adopt(
    state: &mut KernelState,
    thread: ThreadId,
    process: ProcessId,
    object: ObjectId,
    owner: OwnerType,
) -> KernelResult<Reply> {
    let handle = state.adopt_handle(process, object, owner.for_thread(thread))?;
    Ok(Reply::Value(handle.0 as i32))
}

fn step_kill_thread(
    state: &mut KernelState,
    caller: ThreadId,
    process: ProcessId,
    target: Handle,
    reason: i32,
) -> KernelResult<Reply> {
    let tid = state.resolve_typed(caller, target, ObjectKind::Thread)?;
    if state.objects.thread(tid)?.process != process {
        return Err(KernelError::AccessDenied);
    }
    state.terminate_thread(tid, ExitInfo::kill(reason))?;
    Ok(Reply::Value(guest::KERR_NONE))
}

fn step_sleep(state: &mut KernelState, thread: ThreadId, micros: u32, now: u64) -> KernelResult<Reply> {
    if micros == 0 {
        state.scheduler.reschedule = true;
        return Ok(Reply::Value(guest::KERR_NONE));
    }
    let deadline = now.saturating_add(u64::from(micros) * 1_000);
    state
        .block(thread, WaitReason::Sleep, None, Some(deadline))
        .map(Reply::from)
}

fn step_semaphore_wait(
    state: &mut KernelState,
    thread: ThreadId,
    semaphore: Handle,
    timeout_micros: Option<u32>,
    now: u64,
) -> KernelResult<Reply> {
    let sem = state.resolve_typed(thread, semaphore, ObjectKind::Semaphore)?;
    match timeout_micros {
        Some(0) => {
            let s = state.objects.semaphore_mut(sem)?;
            if s.count == 0 {
                return Ok(Reply::Value(guest::KERR_TIMED_OUT));
            }
            s.count -= 1;
            Ok(Reply::Value(guest::KERR_NONE))
        }
        timeout => {
            let deadline = timeout.map(|us| now.saturating_add(u64::from(us) * 1_000));
            state.semaphore_wait(thread, sem, deadline).map(Reply::from)
        }
    }
}

fn step_duplicate(
    state: &mut KernelState,
    thread: ThreadId,
    process: ProcessId,
    handle: Handle,
    target_process: Handle,
    owner: OwnerType,
) -> KernelResult<Reply> {
    let object = state.resolve_for_thread(thread, handle)?;
    let dst = state.resolve_typed(thread, target_process, ObjectKind::Process)?;
    let owner = match owner {
        OwnerType::Process => HandleOwner::Process,
        // A thread-owned handle only makes sense in the caller's own table
        OwnerType::Thread if dst == process => HandleOwner::Thread(thread),
        OwnerType::Thread => return Err(KernelError::InvalidArgument),
    };
    let h = state.open_handle(
        dst,
        object,
        HandleAttrs {
            owner,
            origin: HandleOrigin::Duplicated,
        },
    )?;
    Ok(Reply::Value(h.0 as i32))
}
