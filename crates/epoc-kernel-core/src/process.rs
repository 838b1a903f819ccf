//! Process objects and the image they are built from

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::handle::HandleTable;
use crate::memory::{PageTable, Protection, RegionKind};
use crate::types::{ThreadId, UidType, VirtAddr, ARG_SLOT_COUNT};

/// One startup parameter staged for the guest runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSlot {
    pub data: u32,
    pub size: usize,
}

/// Where an image came from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageOrigin {
    /// E32 executable on a drive
    Executable { path: String },
    /// Execute-in-place image in ROM
    Rom { address: u32 },
}

impl ImageOrigin {
    pub fn path(&self) -> Option<&str> {
        match self {
            ImageOrigin::Executable { path } => Some(path),
            ImageOrigin::Rom { .. } => None,
        }
    }
}

/// A code or data segment of a loaded image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub vaddr: VirtAddr,
    pub data: Vec<u8>,
    /// In-memory size; bytes past `data` are zero-filled
    pub mem_size: u32,
    pub kind: RegionKind,
    pub protection: Protection,
}

/// Heap placement requested by an image
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapBounds {
    pub base: VirtAddr,
    /// Committed at creation
    pub min_size: u32,
    /// Reserved address range
    pub max_size: u32,
}

/// Finished image handed over by the loader
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessImage {
    pub uid_type: UidType,
    pub name: String,
    pub origin: ImageOrigin,
    pub entry: VirtAddr,
    pub segments: Vec<Segment>,
    pub stack_size: u32,
    pub heap: Option<HeapBounds>,
    pub priority: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Running,
    Exited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    Kill,
    Terminate,
    Panic,
}

/// How a thread or process ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    pub kind: ExitKind,
    pub reason: i32,
    pub category: String,
}

impl ExitInfo {
    pub fn kill(reason: i32) -> Self {
        Self {
            kind: ExitKind::Kill,
            reason,
            category: String::from("Kill"),
        }
    }

    pub fn panic(category: &str, reason: i32) -> Self {
        Self {
            kind: ExitKind::Panic,
            reason,
            category: String::from(category),
        }
    }

    /// `KERN-EXEC 3`: unhandled exception in guest code
    pub fn exec_fault() -> Self {
        Self::panic("KERN-EXEC", 3)
    }
}

#[derive(Debug)]
pub struct Process {
    pub uid_type: UidType,
    pub exe_path: String,
    pub cmd_args: String,
    pub origin: ImageOrigin,
    pub state: ProcessState,
    pub page_table: PageTable,
    pub handles: HandleTable,
    pub args: [Option<ArgSlot>; ARG_SLOT_COUNT],
    pub primary_thread: Option<ThreadId>,
    /// Every thread object created in this process that still exists
    pub threads: Vec<ThreadId>,
    pub priority: u8,
    pub heap: Option<HeapBounds>,
    pub exit: Option<ExitInfo>,
}

impl Process {
    pub fn new(image: &ProcessImage, cmd_args: &str, ceiling: u32) -> Self {
        Self {
            uid_type: image.uid_type,
            exe_path: image.origin.path().map(String::from).unwrap_or_default(),
            cmd_args: String::from(cmd_args),
            origin: image.origin.clone(),
            state: ProcessState::Created,
            page_table: PageTable::new(ceiling),
            handles: HandleTable::new(),
            args: [None; ARG_SLOT_COUNT],
            primary_thread: None,
            threads: Vec::new(),
            priority: image.priority,
            heap: image.heap,
            exit: None,
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid_type.uid()
    }

    pub fn set_arg_slot(&mut self, slot: u8, data: u32, size: usize) -> KernelResult<()> {
        let entry = self
            .args
            .get_mut(slot as usize)
            .ok_or(KernelError::ArgSlotOutOfRange(slot))?;
        *entry = Some(ArgSlot { data, size });
        Ok(())
    }

    /// `Ok(None)` for an in-range slot that was never set
    pub fn get_arg_slot(&self, slot: u8) -> KernelResult<Option<ArgSlot>> {
        self.args
            .get(slot as usize)
            .copied()
            .ok_or(KernelError::ArgSlotOutOfRange(slot))
    }
}
