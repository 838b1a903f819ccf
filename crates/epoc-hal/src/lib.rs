//! Execution-engine abstraction for the EPOC kernel emulator
//!
//! The kernel never interprets guest instructions. It hands a thread's
//! register context and a view of its address space to an
//! [`ExecutionEngine`] for one quantum, and the engine reports back why the
//! quantum ended.
//!
//! # Implementations
//!
//! - **Interpreter / JIT**: an ARM CPU core, provided outside this workspace
//! - **Mock**: `epoc-hal-mock`, which replays scripted operations for tests

#![no_std]

extern crate alloc;

use alloc::string::String;

use epoc_kernel_core::{
    Access, HostLocation, KernelCall, PageFault, ThreadContext, ThreadId, VirtAddr,
};

/// Why a quantum ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuantumExit {
    /// The instruction budget ran out
    Completed,
    /// The guest yielded without making a kernel call
    Yield,
    /// The guest trapped into the kernel; the context's PC is already past
    /// the trapping instruction
    KernelCall(KernelCall),
    /// A guest access missed the page table, its protection, or committed
    /// memory. The PC still points at the faulting instruction.
    Fault(PageFault),
    /// A debugger breakpoint was hit at this address
    Breakpoint(VirtAddr),
}

/// Guest address space as seen by the engine for the thread it is running
pub trait GuestMemory {
    /// Read guest bytes; `access` distinguishes data loads from fetches
    fn read(&self, addr: VirtAddr, buf: &mut [u8], access: Access) -> Result<(), PageFault>;

    /// Write guest bytes
    fn write(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), PageFault>;

    /// Resolve one address to the chunk backing it, for engines that cache
    /// host pointers per page
    fn translate(&self, addr: VirtAddr, access: Access) -> Result<HostLocation, PageFault>;
}

/// CPU execution engine
///
/// The engine is owned by the execution-loop host thread, so it only needs
/// to be `Send`.
pub trait ExecutionEngine: Send {
    /// Run `thread` for at most `budget` instructions.
    ///
    /// The engine may keep per-thread state keyed by `thread`; the context is
    /// the authoritative register file and must be written back before
    /// returning.
    fn run_quantum(
        &mut self,
        thread: ThreadId,
        context: &mut ThreadContext,
        memory: &mut dyn GuestMemory,
        budget: u64,
    ) -> Result<QuantumExit, HalError>;

    /// Monotonic time in nanoseconds
    fn now_nanos(&self) -> u64;

    /// A thread is gone; drop anything cached for it
    fn thread_exited(&mut self, _thread: ThreadId) {}
}

/// Engine failures.
///
/// `UndefinedInstruction` is a guest error and kills the thread; anything
/// else means the engine itself is unusable.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("undefined instruction at {0}")]
    UndefinedInstruction(VirtAddr),
    #[error("operation not supported by this engine")]
    NotSupported,
    #[error("execution engine failure: {0}")]
    Engine(String),
}

impl HalError {
    /// Whether the failure is confined to the guest thread that caused it
    pub fn is_guest_error(&self) -> bool {
        matches!(self, HalError::UndefinedInstruction(_))
    }
}
