//! EPOC Kernel Core - Pure State Machine for the Kernel Personality
//!
//! This crate contains the **pure, engine-free** kernel state of the EPOC
//! kernel emulator: kernel objects and their reference counts, per-process
//! handle tables and page tables, processes, threads, synchronisation objects
//! and the priority scheduler.
//!
//! # Design Principles
//!
//! 1. **No engine dependency**: CPU emulation lives behind `epoc-hal`
//! 2. **No I/O, no clock, no locks**: time is passed in, locking is the
//!    runtime's job (`epoc-kernel`)
//! 3. **Deterministic**: the same call sequence always yields the same state
//! 4. **Checkable**: `invariants::check_all_invariants` audits the whole state
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    epoc-kernel-core                         │
//! │                                                             │
//! │   ┌───────────────┐    ┌───────────────┐                   │
//! │   │  KernelState  │    │    step()     │                   │
//! │   │  - objects    │◀───│  kernel call  │                   │
//! │   │  - scheduler  │    │  dispatcher   │                   │
//! │   └───────────────┘    └───────────────┘                   │
//! │         │                                                   │
//! │         ▼                                                   │
//! │   ┌───────────┐ ┌─────────────┐ ┌──────────┐ ┌──────────┐  │
//! │   │  Process  │ │ HandleTable │ │PageTable │ │  Thread  │  │
//! │   └───────────┘ └─────────────┘ └──────────┘ └──────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              │ used by
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       epoc-kernel                           │
//! │   - KernelSystem (RwLock, tick loop, image registry)        │
//! │   - ExecutionEngine integration                             │
//! │   - DebugHandle for the debugger thread                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - `types` - ids, handles, addresses, UIDs, thread context
//! - `error` - `KernelError` and EPOC guest error codes
//! - `object` - kernel object table with reference counts
//! - `handle` - per-process handle table (object index)
//! - `memory` - page table, regions, chunks, page faults
//! - `process` / `thread` / `sync` - object bodies
//! - `scheduler` - ready queues and deadlines
//! - `state` - `KernelState`, the single owner of all of the above
//! - `step` - kernel-call dispatcher
//! - `snapshot` - serialisable introspection views
//! - `invariants` - whole-state consistency checks

#![no_std]
extern crate alloc;

pub mod error;
pub mod handle;
pub mod invariants;
pub mod memory;
pub mod object;
pub mod process;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod step;
pub mod sync;
pub mod thread;
pub mod types;

pub use error::{guest, KernelError, KernelResult};
pub use handle::{HandleAttrs, HandleEntry, HandleOrigin, HandleOwner, HandleTable, OwnerType};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use memory::{
    Access, Chunk, FaultKind, HostLocation, PageFault, PageTable, Protection, Region, RegionKind,
};
pub use object::{KernelObject, ObjectBody, ObjectTable};
pub use process::{
    ArgSlot, ExitInfo, ExitKind, HeapBounds, ImageOrigin, Process, ProcessImage, ProcessState,
    Segment,
};
pub use scheduler::Scheduler;
pub use snapshot::{KernelSnapshot, ObjectInfo, ProcessInfo, RegionInfo, ThreadInfo};
pub use state::{KernelLimits, KernelState, ObjectSpec, WaitOutcome};
pub use step::{step, CallOutcome, CallStatus, KernelCall};
pub use sync::{Mutex, Semaphore};
pub use thread::{Thread, ThreadState, ThreadStats, WaitInfo, WaitReason};
pub use types::{
    Handle, ObjectId, ObjectKind, ProcessId, ThreadContext, ThreadId, UidType, VirtAddr,
    ARG_SLOT_COUNT, MAX_PRIORITY, NUM_PRIORITIES, PAGE_SIZE,
};
