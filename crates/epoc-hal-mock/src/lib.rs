//! Scripted execution engine for testing the EPOC kernel
//!
//! Instead of decoding ARM instructions, `MockEngine` replays a list of
//! [`Op`]s registered per entry point. Every thread starting at that entry
//! runs its own copy of the script, one exiting op per quantum.

#![no_std]
extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use epoc_hal::{ExecutionEngine, GuestMemory, HalError, QuantumExit};
use epoc_kernel_core::{Access, KernelCall, ThreadContext, ThreadId, VirtAddr};
use log::trace;

/// Simulated time per quantum, in nanoseconds
pub const DEFAULT_QUANTUM_NANOS: u64 = 1_000_000;

/// One scripted step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Trap into the kernel
    Call(KernelCall),
    /// Yield without a kernel call
    Yield,
    /// Burn the whole budget
    Spin,
    /// Load bytes; recorded in the thread's read log. Memory ops run
    /// inline and do not end the quantum.
    Read { addr: VirtAddr, len: usize },
    /// Store bytes
    Write { addr: VirtAddr, data: Vec<u8> },
    Breakpoint,
    /// Raise an undefined-instruction error
    Undefined,
}

/// Per-thread replay position and observations
#[derive(Clone, Debug, Default)]
pub struct ThreadTrace {
    entry: VirtAddr,
    cursor: usize,
    awaiting_result: bool,
    /// r0 seen on resumption after each kernel call
    pub results: Vec<i32>,
    /// Bytes returned by each successful `Op::Read`
    pub reads: Vec<Vec<u8>>,
    /// Quanta this thread was given
    pub quanta: u64,
}

/// Mock engine for kernel tests
///
/// Provides simulated time and scripted guest behaviour so the kernel can be
/// driven without a CPU core.
pub struct MockEngine {
    programs: BTreeMap<VirtAddr, Vec<Op>>,
    threads: BTreeMap<ThreadId, ThreadTrace>,
    /// Simulated time in nanoseconds
    time: u64,
    quantum_nanos: u64,
    /// Every thread handed a quantum, in order
    schedule: Vec<ThreadId>,
    /// Threads reported gone by the kernel, in order
    exited: Vec<ThreadId>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            programs: BTreeMap::new(),
            threads: BTreeMap::new(),
            time: 0,
            quantum_nanos: DEFAULT_QUANTUM_NANOS,
            schedule: Vec::new(),
            exited: Vec::new(),
        }
    }

    /// Register the script run by threads starting at `entry`
    pub fn load_program(&mut self, entry: VirtAddr, ops: Vec<Op>) {
        self.programs.insert(entry, ops);
    }

    /// Builder form of `load_program`
    pub fn with_program(mut self, entry: VirtAddr, ops: Vec<Op>) -> Self {
        self.load_program(entry, ops);
        self
    }

    pub fn set_quantum_nanos(&mut self, nanos: u64) {
        self.quantum_nanos = nanos;
    }

    /// Advance the simulated time by the given duration
    pub fn advance_time(&mut self, nanos: u64) {
        self.time = self.time.saturating_add(nanos);
    }

    /// Threads in the order they received quanta
    pub fn schedule(&self) -> &[ThreadId] {
        &self.schedule
    }

    /// Threads the kernel reported as exited
    pub fn exited(&self) -> &[ThreadId] {
        &self.exited
    }

    pub fn trace(&self, thread: ThreadId) -> Option<&ThreadTrace> {
        self.threads.get(&thread)
    }

    /// Whether `thread` has run its script to the end
    pub fn finished(&self, thread: ThreadId) -> bool {
        self.threads.get(&thread).is_some_and(|t| {
            self.programs
                .get(&t.entry)
                .map_or(true, |ops| t.cursor >= ops.len())
        })
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for MockEngine {
    fn run_quantum(
        &mut self,
        thread: ThreadId,
        context: &mut ThreadContext,
        memory: &mut dyn GuestMemory,
        _budget: u64,
    ) -> Result<QuantumExit, HalError> {
        self.time = self.time.saturating_add(self.quantum_nanos);
        self.schedule.push(thread);

        let state = self.threads.entry(thread).or_insert_with(|| ThreadTrace {
            entry: context.pc(),
            ..ThreadTrace::default()
        });
        state.quanta += 1;
        if state.awaiting_result {
            state.results.push(context.return_value());
            state.awaiting_result = false;
        }

        let Some(ops) = self.programs.get(&state.entry) else {
            return Err(HalError::UndefinedInstruction(state.entry));
        };

        loop {
            let Some(op) = ops.get(state.cursor) else {
                // Falling off the end of a script exits the thread
                state.awaiting_result = true;
                return Ok(QuantumExit::KernelCall(KernelCall::ExitThread { reason: 0 }));
            };
            trace!("mock: thread {} op {} {:?}", thread, state.cursor, op);

            match op {
                Op::Read { addr, len } => {
                    let mut buf = alloc::vec![0u8; *len];
                    if let Err(fault) = memory.read(*addr, &mut buf, Access::Read) {
                        return Ok(QuantumExit::Fault(fault));
                    }
                    state.reads.push(buf);
                }
                Op::Write { addr, data } => {
                    if let Err(fault) = memory.write(*addr, data) {
                        return Ok(QuantumExit::Fault(fault));
                    }
                }
                _ => {}
            }

            let pc = VirtAddr(state.entry.0.wrapping_add(4 * state.cursor as u32));
            state.cursor += 1;
            let exit = match op {
                Op::Read { .. } | Op::Write { .. } => continue,
                Op::Call(call) => {
                    state.awaiting_result = true;
                    Ok(QuantumExit::KernelCall(call.clone()))
                }
                Op::Yield => Ok(QuantumExit::Yield),
                Op::Spin => Ok(QuantumExit::Completed),
                Op::Breakpoint => Ok(QuantumExit::Breakpoint(pc)),
                Op::Undefined => Err(HalError::UndefinedInstruction(pc)),
            };
            context.set_pc(VirtAddr(pc.0.wrapping_add(4)));
            return exit;
        }
    }

    fn now_nanos(&self) -> u64 {
        self.time
    }

    fn thread_exited(&mut self, thread: ThreadId) {
        trace!("mock: thread {} exited", thread);
        self.exited.push(thread);
    }
}
