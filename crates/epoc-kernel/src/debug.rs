//! Debugger access from another host thread
//!
//! A `DebugHandle` shares the kernel lock with the execution loop. Reads take
//! the read half and see a state between two ticks, never one in the middle
//! of an operation. Suspend and resume take the write half.

use std::sync::Arc;

use epoc_kernel_core::{
    check_all_invariants, Access, InvariantViolation, KernelSnapshot, KernelState, ObjectId,
    PageFault, ProcessId, ProcessInfo, ThreadId, ThreadInfo, VirtAddr,
};
use log::info;
use parking_lot::RwLock;

use crate::error::SystemResult;

#[derive(Clone)]
pub struct DebugHandle {
    state: Arc<RwLock<KernelState>>,
}

impl DebugHandle {
    pub(crate) fn new(state: Arc<RwLock<KernelState>>) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        self.state.read().snapshot()
    }

    /// Snapshot rendered as pretty-printed JSON
    pub fn snapshot_json(&self) -> SystemResult<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn process(&self, id: ProcessId) -> Option<ProcessInfo> {
        self.state.read().process_info(id)
    }

    pub fn thread(&self, id: ThreadId) -> Option<ThreadInfo> {
        self.state.read().thread_info(id)
    }

    pub fn processes_by_uid(&self, uid: u32) -> Vec<ObjectId> {
        self.state.read().processes_by_uid(uid)
    }

    /// Copy `len` bytes of a process's memory. Unmapped, unreadable or
    /// uncommitted memory reports the fault instead.
    pub fn read_memory(
        &self,
        process: ProcessId,
        addr: VirtAddr,
        len: usize,
    ) -> Result<Vec<u8>, PageFault> {
        let mut buf = vec![0u8; len];
        self.state
            .read()
            .read_memory(process, addr, &mut buf, Access::Read)?;
        Ok(buf)
    }

    /// Stop a thread from being scheduled
    pub fn suspend(&self, thread: ThreadId) -> SystemResult<()> {
        self.state.write().suspend_thread(thread)?;
        info!("debugger suspended thread {}", thread);
        Ok(())
    }

    pub fn resume(&self, thread: ThreadId) -> SystemResult<()> {
        self.state.write().unsuspend(thread)?;
        info!("debugger resumed thread {}", thread);
        Ok(())
    }

    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        check_all_invariants(&self.state.read())
    }
}
