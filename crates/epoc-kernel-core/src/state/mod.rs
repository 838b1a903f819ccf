//! Kernel state - pure data structure holding all kernel state
//!
//! `KernelState` owns the object table and the scheduler. It has no engine,
//! clock or lock; the runtime wrapper (`epoc-kernel`) supplies time and
//! serialises access.
//!
//! Operations are grouped by concern:
//!
//! - this module: object creation, handles, reference counting and destruction
//! - `lifecycle`: processes and threads from creation to exit
//! - `memory`: address-space mapping and translation
//! - `wait`: blocking, waking, semaphores, mutexes, priority inheritance
//! - `sched`: quantum selection, yield, debugger suspend/resume

mod lifecycle;
mod memory;
mod sched;
mod wait;

use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::handle::{HandleAttrs, HandleEntry, HandleOrigin, HandleOwner};
use crate::memory::Chunk;
use crate::object::{ObjectBody, ObjectTable};
use crate::process::{ExitInfo, ProcessImage, ProcessState};
use crate::scheduler::Scheduler;
use crate::sync::{Mutex, Semaphore};
use crate::thread::ThreadState;
use crate::types::{
    page_round_up, Handle, ObjectId, ObjectKind, ProcessId, ThreadId, VirtAddr, MAX_PRIORITY,
};

/// Limits applied to every address space and thread
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelLimits {
    /// Exclusive upper bound of every page table
    pub address_ceiling: u32,
    /// Stacks are placed top-down below this address
    pub stack_ceiling: u32,
    /// Priority for threads created without an explicit one
    pub default_priority: u8,
    /// Largest chunk or stack a guest may reserve
    pub max_chunk_size: u32,
}

impl Default for KernelLimits {
    fn default() -> Self {
        Self {
            address_ceiling: 0x8000_0000,
            stack_ceiling: 0x7000_0000,
            default_priority: 27,
            max_chunk_size: 0x0400_0000,
        }
    }
}

/// Construction arguments for `KernelState::create_object`
#[derive(Clone, Debug)]
pub enum ObjectSpec {
    Process {
        image: ProcessImage,
        cmd_args: String,
    },
    Thread {
        process: ProcessId,
        name: String,
        entry: VirtAddr,
        stack_size: u32,
        priority: u8,
        arg: u32,
    },
    Semaphore {
        name: String,
        initial: u32,
    },
    Mutex {
        name: String,
    },
    Chunk {
        name: String,
        max_size: u32,
        committed: u32,
    },
}

/// Result of a wait request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The object was already signalled; the thread never blocked
    Acquired,
    Blocked,
}

/// The pure kernel state - no engine, no I/O, no side effects.
pub struct KernelState {
    pub limits: KernelLimits,
    pub objects: ObjectTable,
    pub scheduler: Scheduler,
    /// Objects whose count reached zero, awaiting destruction
    doomed: Vec<ObjectId>,
    reaping: bool,
}

impl KernelState {
    pub fn new(limits: KernelLimits) -> Self {
        Self {
            limits,
            objects: ObjectTable::new(),
            scheduler: Scheduler::new(),
            doomed: Vec::new(),
            reaping: false,
        }
    }

    // ========================================================================
    // Object creation
    // ========================================================================

    /// Create any kernel object.
    ///
    /// The returned id carries one reference owned by the caller, who must
    /// `release` it (or hand it to a handle with `adopt_handle`).
    pub fn create_object(&mut self, spec: ObjectSpec) -> KernelResult<ObjectId> {
        match spec {
            ObjectSpec::Process { image, cmd_args } => self.create_process(&image, &cmd_args),
            ObjectSpec::Thread {
                process,
                name,
                entry,
                stack_size,
                priority,
                arg,
            } => self.create_thread(process, &name, entry, stack_size, priority, arg),
            ObjectSpec::Semaphore { name, initial } => Ok(self.create_semaphore(name, initial)),
            ObjectSpec::Mutex { name } => Ok(self.create_mutex(name)),
            ObjectSpec::Chunk {
                name,
                max_size,
                committed,
            } => self.create_chunk(name, max_size, committed),
        }
    }

    pub fn create_semaphore(&mut self, name: String, initial: u32) -> ObjectId {
        let id = self
            .objects
            .insert(name, ObjectBody::Semaphore(Semaphore::new(initial)));
        debug!("created semaphore {} (count {})", id, initial);
        id
    }

    pub fn create_mutex(&mut self, name: String) -> ObjectId {
        let id = self.objects.insert(name, ObjectBody::Mutex(Mutex::default()));
        debug!("created mutex {}", id);
        id
    }

    /// Shared chunk of `max_size` reserved bytes, `committed` of them backed
    pub fn create_chunk(
        &mut self,
        name: String,
        max_size: u32,
        committed: u32,
    ) -> KernelResult<ObjectId> {
        let max_size = page_round_up(max_size).ok_or(KernelError::OutOfMemory)?;
        if max_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if max_size > self.limits.max_chunk_size {
            return Err(KernelError::OutOfMemory);
        }
        let committed = page_round_up(committed).ok_or(KernelError::OutOfMemory)?;
        let chunk = Chunk::new(max_size, committed, true)?;
        let id = self.objects.insert(name, ObjectBody::Chunk(chunk));
        debug!("created chunk {} ({:#x} reserved)", id, max_size);
        Ok(id)
    }

    pub(crate) fn check_priority(priority: u8) -> KernelResult<()> {
        if priority > MAX_PRIORITY {
            return Err(KernelError::PriorityOutOfRange(priority));
        }
        Ok(())
    }

    // ========================================================================
    // Handle resolution
    // ========================================================================

    /// Look up `handle` in `process`'s table.
    ///
    /// `CURRENT_PROCESS` names `process` itself. `CURRENT_THREAD` needs a
    /// calling thread and is rejected here; see `resolve_for_thread`.
    pub fn resolve(&self, process: ProcessId, handle: Handle) -> KernelResult<ObjectId> {
        let p = self.objects.process(process)?;
        if handle == Handle::CURRENT_PROCESS {
            return Ok(process);
        }
        Ok(p.handles.get(handle)?.object)
    }

    /// Resolve on behalf of a calling thread, pseudo-handles included
    pub fn resolve_for_thread(&self, thread: ThreadId, handle: Handle) -> KernelResult<ObjectId> {
        if handle == Handle::CURRENT_THREAD {
            self.objects.thread(thread)?;
            return Ok(thread);
        }
        let process = self.objects.thread(thread)?.process;
        self.resolve(process, handle)
    }

    /// Resolve and check the object kind
    pub fn resolve_typed(
        &self,
        thread: ThreadId,
        handle: Handle,
        kind: ObjectKind,
    ) -> KernelResult<ObjectId> {
        let id = self.resolve_for_thread(thread, handle)?;
        let found = self.objects.kind_of(id)?;
        if found != kind {
            return Err(KernelError::WrongObjectType {
                object: id,
                expected: kind,
                found,
            });
        }
        Ok(id)
    }

    /// Objects of every live process built from `uid`
    pub fn processes_by_uid(&self, uid: u32) -> Vec<ProcessId> {
        self.objects
            .iter()
            .filter_map(|o| match &o.body {
                ObjectBody::Process(p) if p.uid() == uid && p.state != ProcessState::Exited => {
                    Some(o.id)
                }
                _ => None,
            })
            .collect()
    }

    // ========================================================================
    // Handle table operations
    // ========================================================================

    /// Store `object` in `process`'s table, consuming a reference the caller
    /// already holds. On failure that reference is released.
    pub fn adopt_handle(
        &mut self,
        process: ProcessId,
        object: ObjectId,
        owner: HandleOwner,
    ) -> KernelResult<Handle> {
        self.adopt_with(process, object, HandleAttrs::created(owner))
    }

    /// Open a new handle to `object`, taking a fresh reference
    pub fn open_handle(
        &mut self,
        process: ProcessId,
        object: ObjectId,
        attrs: HandleAttrs,
    ) -> KernelResult<Handle> {
        self.objects.retain(object)?;
        self.adopt_with(process, object, attrs)
    }

    fn adopt_with(
        &mut self,
        process: ProcessId,
        object: ObjectId,
        attrs: HandleAttrs,
    ) -> KernelResult<Handle> {
        match self.insert_entry(process, object, attrs) {
            Ok(h) => Ok(h),
            Err(e) => {
                self.release(object)?;
                Err(e)
            }
        }
    }

    fn insert_entry(
        &mut self,
        process: ProcessId,
        object: ObjectId,
        attrs: HandleAttrs,
    ) -> KernelResult<Handle> {
        let kind = self.objects.kind_of(object)?;
        let p = self.objects.process_mut(process)?;
        if p.state == ProcessState::Exited {
            return Err(KernelError::ProcessNotRunnable(process));
        }
        p.handles.insert(HandleEntry {
            object,
            kind,
            attrs,
        })
    }

    /// Close a handle and drop the reference it held.
    ///
    /// The entry is gone before the release runs, so destruction can never
    /// leave a dangling entry behind.
    pub fn close_handle(&mut self, process: ProcessId, handle: Handle) -> KernelResult<()> {
        let entry = self.objects.process_mut(process)?.handles.close(handle)?;
        self.release(entry.object)
    }

    /// Give `dst` a new handle to the object `handle` names in `src`
    pub fn duplicate_handle(
        &mut self,
        src: ProcessId,
        handle: Handle,
        dst: ProcessId,
        owner: HandleOwner,
    ) -> KernelResult<Handle> {
        let object = self.resolve(src, handle)?;
        self.open_handle(
            dst,
            object,
            HandleAttrs {
                owner,
                origin: HandleOrigin::Duplicated,
            },
        )
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    pub fn retain(&mut self, id: ObjectId) -> KernelResult<()> {
        self.objects.retain(id).map(|_| ())
    }

    /// Drop one reference; destroys the object when none remain.
    ///
    /// Destruction can release further objects. Those are queued and handled
    /// by the outermost `release`, so teardown never recurses.
    pub fn release(&mut self, id: ObjectId) -> KernelResult<()> {
        if self.objects.release(id)? == 0 {
            self.doomed.push(id);
        }
        if self.reaping {
            return Ok(());
        }

        self.reaping = true;
        let mut result = Ok(());
        while let Some(next) = self.doomed.pop() {
            if let Err(e) = self.destroy(next) {
                warn!("destroying {} failed: {}", next, e);
                result = Err(e);
            }
        }
        self.reaping = false;
        result
    }

    /// Release every id even when some fail; the first error is returned.
    pub(crate) fn release_all(
        &mut self,
        ids: impl IntoIterator<Item = ObjectId>,
    ) -> KernelResult<()> {
        let mut result = Ok(());
        for id in ids {
            result = result.and(self.release(id));
        }
        result
    }

    fn destroy(&mut self, id: ObjectId) -> KernelResult<()> {
        // A never-started process or thread is terminated before it goes.
        let live = match self.objects.get(id).map(|o| &o.body) {
            None => return Ok(()),
            Some(ObjectBody::Process(p)) => {
                (p.state != ProcessState::Exited).then_some(ObjectKind::Process)
            }
            Some(ObjectBody::Thread(t)) => {
                (t.state != ThreadState::Terminated).then_some(ObjectKind::Thread)
            }
            Some(_) => None,
        };
        let mut result = match live {
            Some(ObjectKind::Process) => self.terminate_process(id, ExitInfo::kill(0)),
            Some(ObjectKind::Thread) => self.terminate_thread(id, ExitInfo::kill(0)),
            _ => Ok(()),
        };

        let Some(obj) = self.objects.remove(id) else {
            return result;
        };
        debug!("destroyed {:?} {} '{}'", obj.kind(), id, obj.name);

        match obj.body {
            ObjectBody::Process(mut p) => {
                let handles = p.handles.drain().into_iter().map(|e| e.object);
                let chunks = p.page_table.drain().into_iter().map(|r| r.chunk);
                let primary = p.primary_thread;
                result = result.and(self.release_all(handles.chain(chunks).chain(primary)));
            }
            ObjectBody::Thread(t) => {
                if let Ok(p) = self.objects.process_mut(t.process) {
                    p.threads.retain(|&tid| tid != id);
                }
            }
            ObjectBody::Mutex(m) => {
                if let Some(owner) = m.owner {
                    if let Ok(t) = self.objects.thread_mut(owner) {
                        t.held_mutexes.retain(|&mx| mx != id);
                    }
                }
            }
            ObjectBody::Semaphore(_) | ObjectBody::Chunk(_) => {}
        }
        result
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new(KernelLimits::default())
    }
}
