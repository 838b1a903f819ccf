//! Point-in-time views of kernel state for the debugger
//!
//! Snapshots are plain owned data, so they can leave the kernel lock and be
//! serialised (the runtime renders them as JSON).

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::memory::{Protection, RegionKind};
use crate::object::ObjectBody;
use crate::process::{ExitInfo, ProcessState};
use crate::state::KernelState;
use crate::thread::{ThreadState, ThreadStats, WaitInfo};
use crate::types::{ObjectId, ObjectKind, UidType, VirtAddr};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub name: String,
    pub ref_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub start: VirtAddr,
    pub size: u32,
    pub kind: RegionKind,
    pub protection: Protection,
    pub chunk: ObjectId,
    /// Committed bytes of the backing chunk
    pub committed: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ObjectId,
    pub name: String,
    pub uid_type: UidType,
    pub state: ProcessState,
    pub exe_path: String,
    pub cmd_args: String,
    pub primary_thread: Option<ObjectId>,
    pub threads: Vec<ObjectId>,
    pub handle_count: usize,
    pub regions: Vec<RegionInfo>,
    pub exit: Option<ExitInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: ObjectId,
    pub name: String,
    pub process: ObjectId,
    pub state: ThreadState,
    pub base_priority: u8,
    pub priority: u8,
    pub suspended: bool,
    pub is_primary: bool,
    pub pc: VirtAddr,
    pub sp: VirtAddr,
    pub wait: Option<WaitInfo>,
    pub held_mutexes: Vec<ObjectId>,
    pub stats: ThreadStats,
    pub exit: Option<ExitInfo>,
}

/// Consistent view of every object, taken under one lock acquisition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub processes: Vec<ProcessInfo>,
    pub threads: Vec<ThreadInfo>,
    pub objects: Vec<ObjectInfo>,
    pub current: Option<ObjectId>,
    /// Queued threads, most urgent first
    pub ready: Vec<ObjectId>,
}

impl KernelState {
    pub fn snapshot(&self) -> KernelSnapshot {
        let mut snap = KernelSnapshot {
            current: self.scheduler.current,
            ready: self.scheduler.ready_threads().collect(),
            ..KernelSnapshot::default()
        };
        for obj in self.objects.iter() {
            snap.objects.push(ObjectInfo {
                id: obj.id,
                kind: obj.kind(),
                name: obj.name.clone(),
                ref_count: obj.ref_count,
            });
        }
        for id in self.objects.ids_of_kind(ObjectKind::Process) {
            if let Some(info) = self.process_info(id) {
                snap.processes.push(info);
            }
        }
        for id in self.objects.ids_of_kind(ObjectKind::Thread) {
            if let Some(info) = self.thread_info(id) {
                snap.threads.push(info);
            }
        }
        snap
    }

    pub fn process_info(&self, id: ObjectId) -> Option<ProcessInfo> {
        let obj = self.objects.get(id)?;
        let ObjectBody::Process(p) = &obj.body else {
            return None;
        };
        let regions = p
            .page_table
            .regions()
            .map(|r| RegionInfo {
                start: r.start,
                size: r.size,
                kind: r.kind,
                protection: r.protection,
                chunk: r.chunk,
                committed: self.objects.chunk(r.chunk).map(|c| c.committed()).unwrap_or(0),
            })
            .collect();
        Some(ProcessInfo {
            id,
            name: obj.name.clone(),
            uid_type: p.uid_type,
            state: p.state,
            exe_path: p.exe_path.clone(),
            cmd_args: p.cmd_args.clone(),
            primary_thread: p.primary_thread,
            threads: p.threads.clone(),
            handle_count: p.handles.len(),
            regions,
            exit: p.exit.clone(),
        })
    }

    pub fn thread_info(&self, id: ObjectId) -> Option<ThreadInfo> {
        let obj = self.objects.get(id)?;
        let ObjectBody::Thread(t) = &obj.body else {
            return None;
        };
        Some(ThreadInfo {
            id,
            name: obj.name.clone(),
            process: t.process,
            state: t.state,
            base_priority: t.base_priority,
            priority: t.priority,
            suspended: t.suspended,
            is_primary: t.is_primary,
            pc: t.context.pc(),
            sp: t.context.sp(),
            wait: t.wait,
            held_mutexes: t.held_mutexes.clone(),
            stats: t.stats,
            exit: t.exit.clone(),
        })
    }
}
