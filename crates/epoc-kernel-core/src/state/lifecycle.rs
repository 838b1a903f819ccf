//! Process and thread lifecycle
//!
//! Reference rules:
//!
//! - `create_process` / `create_thread` return one reference to the caller
//! - a process holds one reference on its primary thread until destroyed
//! - `run_process` / `resume_thread` take a "started" reference on the
//!   object, dropped when it exits
//!
//! A process exits when its last started thread terminates, or at once when
//! its primary thread faults or the process is killed. Exit tears down every
//! remaining thread, then the handle table, then the address space.

use alloc::format;
use alloc::string::String;

use log::{debug, info, warn};

use super::KernelState;
use crate::error::{KernelError, KernelResult};
use crate::memory::{Chunk, PageFault, Protection, RegionKind};
use crate::object::ObjectBody;
use crate::process::{ExitInfo, HeapBounds, Process, ProcessImage, ProcessState, Segment};
use crate::thread::{Thread, ThreadState};
use crate::types::{
    page_round_up, ObjectId, ProcessId, ThreadContext, ThreadId, VirtAddr, PAGE_SIZE,
};

impl KernelState {
    // ========================================================================
    // Creation
    // ========================================================================

    /// Build a process from a loaded image.
    ///
    /// Installs every segment, then creates the primary thread with its stack
    /// and the image's heap. Nothing is left behind if any step fails.
    pub fn create_process(
        &mut self,
        image: &ProcessImage,
        cmd_args: &str,
    ) -> KernelResult<ProcessId> {
        Self::check_priority(image.priority)?;
        let process = Process::new(image, cmd_args, self.limits.address_ceiling);
        let pid = self
            .objects
            .insert(image.name.clone(), ObjectBody::Process(process));

        if let Err(e) = self.populate(pid, image) {
            warn!("creating process '{}' failed: {}", image.name, e);
            self.release(pid)?;
            return Err(e);
        }
        info!(
            "created process {} '{}' uid {:#010x}",
            pid,
            image.name,
            image.uid_type.uid()
        );
        Ok(pid)
    }

    fn populate(&mut self, pid: ProcessId, image: &ProcessImage) -> KernelResult<()> {
        for segment in &image.segments {
            self.install_segment(pid, segment)?;
        }
        self.create_primary_thread(pid, image.entry, image.stack_size, image.heap)?;
        Ok(())
    }

    fn install_segment(&mut self, pid: ProcessId, segment: &Segment) -> KernelResult<()> {
        let len = segment.mem_size.max(segment.data.len() as u32);
        let size = page_round_up(len).ok_or(KernelError::OutOfMemory)?;
        let chunk = Chunk::with_data(&segment.data, size, size)?;
        self.map_private(
            pid,
            segment.vaddr,
            size,
            segment.kind,
            segment.protection,
            chunk,
        )?;
        Ok(())
    }

    /// Give a process its primary thread, stack and heap.
    ///
    /// The thread starts in `Created` with PC at `entry` and SP at the top of
    /// its stack. Address-space exhaustion reports `OutOfMemory`.
    pub fn create_primary_thread(
        &mut self,
        pid: ProcessId,
        entry: VirtAddr,
        stack_size: u32,
        heap: Option<HeapBounds>,
    ) -> KernelResult<ThreadId> {
        let (priority, name) = {
            let p = self.objects.process(pid)?;
            if p.state == ProcessState::Exited {
                return Err(KernelError::ProcessNotRunnable(pid));
            }
            if p.primary_thread.is_some() {
                return Err(KernelError::PrimaryThreadExists(pid));
            }
            let name = self.objects.get(pid).map(|o| o.name.clone()).unwrap_or_default();
            (p.priority, name)
        };

        if let Some(heap) = heap {
            self.map_heap(pid, heap).map_err(exhaustion)?;
        }
        let tid = self
            .spawn_thread(pid, format!("{}::Main", name), entry, stack_size, priority, true)
            .map_err(exhaustion)?;

        let p = self.objects.process_mut(pid)?;
        p.primary_thread = Some(tid);
        Ok(tid)
    }

    fn map_heap(&mut self, pid: ProcessId, heap: HeapBounds) -> KernelResult<()> {
        if heap.min_size > heap.max_size {
            return Err(KernelError::InvalidArgument);
        }
        let reserved = page_round_up(heap.max_size).ok_or(KernelError::OutOfMemory)?;
        let committed = page_round_up(heap.min_size).ok_or(KernelError::OutOfMemory)?;
        let chunk = Chunk::new(reserved, committed, false)?;
        self.map_private(pid, heap.base, reserved, RegionKind::Heap, Protection::RW, chunk)?;
        Ok(())
    }

    /// Create a secondary thread in `pid`.
    ///
    /// `arg` is passed in r0. The returned reference belongs to the caller.
    pub fn create_thread(
        &mut self,
        pid: ProcessId,
        name: &str,
        entry: VirtAddr,
        stack_size: u32,
        priority: u8,
        arg: u32,
    ) -> KernelResult<ThreadId> {
        Self::check_priority(priority)?;
        if self.objects.process(pid)?.state == ProcessState::Exited {
            return Err(KernelError::ProcessNotRunnable(pid));
        }
        let tid = self.spawn_thread(pid, String::from(name), entry, stack_size, priority, false)?;
        self.objects.thread_mut(tid)?.context.regs[0] = arg;
        Ok(tid)
    }

    fn spawn_thread(
        &mut self,
        pid: ProcessId,
        name: String,
        entry: VirtAddr,
        stack_size: u32,
        priority: u8,
        is_primary: bool,
    ) -> KernelResult<ThreadId> {
        let (base, size) = self.map_stack(pid, stack_size)?;
        let top = base.checked_add(size).ok_or(KernelError::OutOfMemory)?;

        let mut thread = Thread::new(pid, ThreadContext::new(entry, top), priority, is_primary);
        thread.stack = Some(base);
        let tid = self.objects.insert(name, ObjectBody::Thread(thread));
        self.objects.process_mut(pid)?.threads.push(tid);
        debug!("created thread {} in {} (entry {}, stack {})", tid, pid, entry, base);
        Ok(tid)
    }

    /// Map a stack below the stack ceiling, leaving an unmapped guard page
    /// above it so neighbouring stacks never touch.
    fn map_stack(&mut self, pid: ProcessId, stack_size: u32) -> KernelResult<(VirtAddr, u32)> {
        let size = page_round_up(stack_size.max(PAGE_SIZE)).ok_or(KernelError::OutOfMemory)?;
        if size > self.limits.max_chunk_size {
            return Err(KernelError::OutOfMemory);
        }
        let reserve = size.checked_add(PAGE_SIZE).ok_or(KernelError::OutOfMemory)?;
        let base = self
            .objects
            .process(pid)?
            .page_table
            .find_free(reserve, PAGE_SIZE, self.limits.stack_ceiling)
            .ok_or(KernelError::OutOfMemory)?;
        let chunk = Chunk::new(size, size, false)?;
        self.map_private(pid, base, size, RegionKind::Stack, Protection::RW, chunk)?;
        Ok((base, size))
    }

    // ========================================================================
    // Starting
    // ========================================================================

    /// Start a process by making its primary thread ready.
    ///
    /// A second call reports `AlreadyRunning`; an exited process reports
    /// `ProcessNotRunnable`.
    pub fn run_process(&mut self, pid: ProcessId) -> KernelResult<()> {
        let p = self.objects.process_mut(pid)?;
        let primary = match p.state {
            ProcessState::Running => return Err(KernelError::AlreadyRunning(pid)),
            ProcessState::Exited => return Err(KernelError::ProcessNotRunnable(pid)),
            ProcessState::Created => p
                .primary_thread
                .ok_or(KernelError::ProcessNotRunnable(pid))?,
        };
        p.state = ProcessState::Running;
        self.retain(pid)?;
        self.start_thread(primary)?;
        info!("process {} running", pid);
        Ok(())
    }

    /// `Created` to `Ready`, taking the started reference
    fn start_thread(&mut self, tid: ThreadId) -> KernelResult<()> {
        let t = self.objects.thread_mut(tid)?;
        t.transition(tid, ThreadState::Ready)?;
        let (priority, schedulable) = (t.priority, t.is_schedulable());
        self.retain(tid)?;
        if schedulable {
            self.scheduler.enqueue(tid, priority);
        }
        Ok(())
    }

    /// Start a created thread or lift a debugger suspension.
    ///
    /// Threads of a process that has not been run cannot be started.
    pub fn resume_thread(&mut self, tid: ThreadId) -> KernelResult<()> {
        let t = self.objects.thread(tid)?;
        match t.state {
            ThreadState::Created => {
                let pid = t.process;
                if self.objects.process(pid)?.state != ProcessState::Running {
                    return Err(KernelError::ProcessNotRunnable(pid));
                }
                self.start_thread(tid)
            }
            ThreadState::Terminated => Err(KernelError::InvalidThreadState {
                thread: tid,
                from: ThreadState::Terminated,
                to: ThreadState::Ready,
            }),
            _ => self.unsuspend(tid),
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Terminate one thread.
    ///
    /// Releases what the thread holds: its wait-queue entry, owned mutexes,
    /// thread-owned handles and finally its started reference. If it was the
    /// last started thread of a running process, the process exits too.
    pub fn terminate_thread(&mut self, tid: ThreadId, exit: ExitInfo) -> KernelResult<()> {
        let t = self.objects.thread(tid)?;
        let (pid, prev, priority, wait) = (t.process, t.state, t.priority, t.wait);

        match prev {
            ThreadState::Terminated => {
                return Err(KernelError::InvalidThreadState {
                    thread: tid,
                    from: prev,
                    to: ThreadState::Terminated,
                })
            }
            ThreadState::Ready => {
                self.scheduler.remove(tid, priority);
            }
            _ => {}
        }
        let wait_object = self.detach_wait(tid, wait)?;

        let (held, stack) = {
            let t = self.objects.thread_mut(tid)?;
            t.transition(tid, ThreadState::Terminated)?;
            t.wait = None;
            t.fault_retry = None;
            t.exit = Some(exit.clone());
            (core::mem::take(&mut t.held_mutexes), t.stack.take())
        };
        if self.scheduler.current == Some(tid) {
            self.scheduler.current = None;
        }
        debug!("thread {} terminated ({:?} {})", tid, exit.kind, exit.reason);

        let mut result = Ok(());
        for mutex in held {
            result = result.and(self.abandon_mutex(tid, mutex));
        }
        let owned = match self.objects.process_mut(pid) {
            Ok(p) => p.handles.drain_owned_by(tid),
            Err(_) => alloc::vec::Vec::new(),
        };
        result = result.and(self.release_all(owned.into_iter().map(|e| e.object)));
        if let Some(base) = stack {
            result = result.and(self.unmap_stack(pid, base));
        }

        if prev != ThreadState::Created {
            if self.last_thread_exited(pid) {
                result = result.and(self.terminate_process(pid, exit));
            }
            result = result.and(self.release_all(wait_object.into_iter().chain([tid])));
        }
        result
    }

    /// Unmap the stack region based at `base`, if the process still has it
    fn unmap_stack(&mut self, pid: ProcessId, base: VirtAddr) -> KernelResult<()> {
        let Ok(p) = self.objects.process(pid) else {
            return Ok(());
        };
        let size = match p.page_table.region_at(base) {
            Some(r) if r.kind == RegionKind::Stack && r.start == base => r.size,
            _ => return Ok(()),
        };
        self.unmap(pid, base, size)
    }

    fn last_thread_exited(&self, pid: ProcessId) -> bool {
        let Ok(p) = self.objects.process(pid) else {
            return false;
        };
        p.state == ProcessState::Running
            && !p.threads.iter().any(|&tid| {
                self.objects
                    .thread(tid)
                    .is_ok_and(|t| t.state.is_live())
            })
    }

    /// Terminate a process and everything in it.
    ///
    /// Threads go first, then handles, then the address space. Killing an
    /// already exited process reports `ProcessNotRunnable`.
    pub fn terminate_process(&mut self, pid: ProcessId, exit: ExitInfo) -> KernelResult<()> {
        let (prev, threads) = {
            let p = self.objects.process_mut(pid)?;
            if p.state == ProcessState::Exited {
                return Err(KernelError::ProcessNotRunnable(pid));
            }
            let prev = p.state;
            p.state = ProcessState::Exited;
            p.exit = Some(exit.clone());
            (prev, p.threads.clone())
        };

        let mut result = Ok(());
        for tid in threads {
            let live = self
                .objects
                .thread(tid)
                .is_ok_and(|t| t.state != ThreadState::Terminated);
            if live {
                result = result.and(self.terminate_thread(tid, exit.clone()));
            }
        }

        let (handles, regions) = match self.objects.process_mut(pid) {
            Ok(p) => (p.handles.drain(), p.page_table.drain()),
            Err(_) => return result,
        };
        let handles = handles.into_iter().map(|e| e.object);
        let chunks = regions.into_iter().map(|r| r.chunk);
        result = result.and(self.release_all(handles.chain(chunks)));

        info!(
            "process {} exited ({:?} {} {})",
            pid, exit.kind, exit.category, exit.reason
        );
        if prev == ProcessState::Running {
            result = result.and(self.release(pid));
        }
        result
    }

    /// Unhandled memory fault: the thread dies, and its process with it when
    /// it is the primary thread.
    pub fn fault_thread(&mut self, tid: ThreadId, fault: PageFault) -> KernelResult<()> {
        self.objects.thread_mut(tid)?.stats.faults += 1;
        warn!(
            "thread {} faulted: {:?} {:?} at {}",
            tid, fault.kind, fault.access, fault.addr
        );
        self.panic_thread(tid, ExitInfo::exec_fault())
    }

    /// Kill a thread for a guest error. A primary thread takes its process
    /// down with it.
    pub fn panic_thread(&mut self, tid: ThreadId, exit: ExitInfo) -> KernelResult<()> {
        let t = self.objects.thread(tid)?;
        let (pid, primary) = (t.process, t.is_primary);
        if primary {
            self.terminate_process(pid, exit)
        } else {
            self.terminate_thread(tid, exit)
        }
    }

    /// Name of an object, empty when unknown
    pub fn object_name(&self, id: ObjectId) -> &str {
        self.objects.get(id).map(|o| o.name.as_str()).unwrap_or("")
    }
}

/// Mapping failures while building a thread mean the address space is full
fn exhaustion(e: KernelError) -> KernelError {
    match e {
        KernelError::MappingOverlap { .. } | KernelError::AddressCeiling { .. } => {
            KernelError::OutOfMemory
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{running_process, test_image};
    use super::*;
    use crate::memory::{Access, FaultKind};
    use crate::process::ExitKind;
    use crate::types::ObjectKind;

    #[test]
    fn test_create_process_scenario() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(0x1000_0001), "").unwrap();
        state.run_process(pid).unwrap();

        let p = state.objects.process(pid).unwrap();
        assert_eq!(p.threads.len(), 1);
        let tid = p.primary_thread.unwrap();
        let t = state.objects.thread(tid).unwrap();
        assert_eq!(t.state, ThreadState::Ready);
        assert_eq!(t.context.pc(), VirtAddr(0x8000));
        assert!(t.is_primary);

        let code = p.page_table.region_at(VirtAddr(0x8000)).unwrap();
        assert_eq!(code.kind, RegionKind::Code);
        let stack = p.page_table.region_at(t.stack.unwrap()).unwrap();
        assert_eq!(stack.kind, RegionKind::Stack);
        assert_eq!(stack.size, 4096);
        assert_eq!(t.context.sp().0, stack.start.0 + 4096);

        let heap = p.page_table.region_at(VirtAddr(0x40_0000)).unwrap();
        assert_eq!(heap.kind, RegionKind::Heap);
        assert_eq!(heap.size, 0x4000);
    }

    #[test]
    fn test_run_twice_is_misuse() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(1), "").unwrap();
        state.run_process(pid).unwrap();
        assert_eq!(state.run_process(pid), Err(KernelError::AlreadyRunning(pid)));
        assert_eq!(state.objects.process(pid).unwrap().threads.len(), 1);
        assert_eq!(state.scheduler.ready_count(), 1);
    }

    #[test]
    fn test_second_primary_thread_rejected() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(1), "").unwrap();
        assert_eq!(
            state.create_primary_thread(pid, VirtAddr(0x8000), 4096, None),
            Err(KernelError::PrimaryThreadExists(pid))
        );
    }

    #[test]
    fn test_overlapping_segments_fail_cleanly() {
        let mut state = KernelState::default();
        let mut image = test_image(1);
        image.segments[1].vaddr = VirtAddr(0x8000);

        assert!(matches!(
            state.create_process(&image, ""),
            Err(KernelError::MappingOverlap { .. })
        ));
        assert!(state.objects.is_empty());
    }

    #[test]
    fn test_heap_out_of_address_space() {
        let mut state = KernelState::default();
        let mut image = test_image(1);
        image.heap = Some(HeapBounds {
            base: VirtAddr(0x7FFF_F000),
            min_size: 0x1000,
            max_size: 0x4000,
        });
        assert_eq!(state.create_process(&image, ""), Err(KernelError::OutOfMemory));
        assert!(state.objects.is_empty());
    }

    #[test]
    fn test_stacks_get_guard_pages() {
        let mut state = KernelState::default();
        let (pid, _) = running_process(&mut state);
        let a = state
            .create_thread(pid, "a", VirtAddr(0x8000), 0x2000, 20, 0)
            .unwrap();
        let b = state
            .create_thread(pid, "b", VirtAddr(0x8000), 0x2000, 20, 0)
            .unwrap();
        let a_base = state.objects.thread(a).unwrap().stack.unwrap();
        let b_top = state.objects.thread(b).unwrap().context.sp();
        assert!(b_top.0 + PAGE_SIZE <= a_base.0);

        let p = state.objects.process(pid).unwrap();
        assert!(p.page_table.region_at(b_top).is_none());
    }

    #[test]
    fn test_secondary_thread_gets_arg() {
        let mut state = KernelState::default();
        let (pid, _) = running_process(&mut state);
        let t = state
            .create_thread(pid, "worker", VirtAddr(0x8010), 4096, 30, 0xABCD)
            .unwrap();
        let thread = state.objects.thread(t).unwrap();
        assert_eq!(thread.context.regs[0], 0xABCD);
        assert_eq!(thread.state, ThreadState::Created);
        assert_eq!(state.object_name(t), "worker");
        assert_eq!(
            state.create_thread(pid, "x", VirtAddr(0x8000), 4096, 64, 0),
            Err(KernelError::PriorityOutOfRange(64))
        );
    }

    #[test]
    fn test_last_thread_exit_ends_process() {
        let mut state = KernelState::default();
        let (pid, tid) = running_process(&mut state);

        state.terminate_thread(tid, ExitInfo::kill(5)).unwrap();

        let p = state.objects.process(pid).unwrap();
        assert_eq!(p.state, ProcessState::Exited);
        assert_eq!(p.exit.as_ref().unwrap().reason, 5);
        assert!(p.page_table.is_empty());
        // Creator reference keeps the process object alive
        assert_eq!(state.objects.ref_count(pid), Some(1));

        state.release(pid).unwrap();
        assert!(state.objects.is_empty());
    }

    #[test]
    fn test_process_survives_secondary_exit() {
        let mut state = KernelState::default();
        let (pid, main) = running_process(&mut state);
        let worker = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        state.resume_thread(worker).unwrap();

        state.terminate_thread(main, ExitInfo::kill(0)).unwrap();
        assert_eq!(
            state.objects.process(pid).unwrap().state,
            ProcessState::Running
        );

        state.terminate_thread(worker, ExitInfo::kill(0)).unwrap();
        assert_eq!(
            state.objects.process(pid).unwrap().state,
            ProcessState::Exited
        );
    }

    #[test]
    fn test_double_terminate_reported() {
        let mut state = KernelState::default();
        let (pid, tid) = running_process(&mut state);
        let worker = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        state.terminate_thread(worker, ExitInfo::kill(0)).unwrap();
        assert!(matches!(
            state.terminate_thread(worker, ExitInfo::kill(0)),
            Err(KernelError::InvalidThreadState { .. })
        ));

        state.terminate_process(pid, ExitInfo::kill(0)).unwrap();
        assert_eq!(
            state.terminate_process(pid, ExitInfo::kill(0)),
            Err(KernelError::ProcessNotRunnable(pid))
        );
        assert_eq!(
            state.objects.thread(tid).unwrap().state,
            ThreadState::Terminated
        );
    }

    #[test]
    fn test_release_created_process_terminates_it() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(1), "").unwrap();
        let sem = state.create_semaphore(String::new(), 0);
        state
            .adopt_handle(pid, sem, crate::handle::HandleOwner::Process)
            .unwrap();

        state.release(pid).unwrap();
        assert!(state.objects.is_empty());
        assert_eq!(state.scheduler.ready_count(), 0);
    }

    #[test]
    fn test_teardown_finishes_past_a_failed_release() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(1), "").unwrap();
        let worker = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        let sem = state.create_semaphore(String::new(), 0);
        state
            .adopt_handle(pid, sem, crate::handle::HandleOwner::Process)
            .unwrap();
        let keep = state.create_semaphore(String::new(), 0);
        state
            .adopt_handle(pid, keep, crate::handle::HandleOwner::Process)
            .unwrap();
        // The handle now names an object that is already gone
        state.objects.remove(sem);

        assert!(state.release(pid).is_err());
        assert!(!state.objects.contains(pid));
        assert!(!state.objects.contains(worker));
        assert!(state.objects.ids_of_kind(ObjectKind::Chunk).is_empty());
        // Handles after the broken one are still closed
        assert!(!state.objects.contains(keep));
        assert!(state.objects.is_empty());
    }

    #[test]
    fn test_thread_owned_handles_closed_on_exit() {
        let mut state = KernelState::default();
        let (pid, main) = running_process(&mut state);
        let sem = state.create_semaphore(String::new(), 0);
        let h = state
            .adopt_handle(pid, sem, crate::handle::HandleOwner::Thread(main))
            .unwrap();
        let keep = state.create_semaphore(String::new(), 0);
        state
            .adopt_handle(pid, keep, crate::handle::HandleOwner::Process)
            .unwrap();
        let worker = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        state.resume_thread(worker).unwrap();

        state.terminate_thread(main, ExitInfo::kill(0)).unwrap();
        assert!(!state.objects.contains(sem));
        assert!(state.objects.contains(keep));
        assert!(state.resolve(pid, h).is_err());
    }

    #[test]
    fn test_primary_fault_kills_process() {
        let mut state = KernelState::default();
        let (pid, tid) = running_process(&mut state);
        let fault = PageFault {
            addr: VirtAddr(0),
            access: Access::Read,
            kind: FaultKind::Unmapped,
        };
        state.fault_thread(tid, fault).unwrap();

        let p = state.objects.process(pid).unwrap();
        assert_eq!(p.state, ProcessState::Exited);
        let exit = p.exit.as_ref().unwrap();
        assert_eq!(exit.kind, ExitKind::Panic);
        assert_eq!(exit.category, "KERN-EXEC");
        assert_eq!(exit.reason, 3);
    }

    #[test]
    fn test_secondary_fault_kills_only_thread() {
        let mut state = KernelState::default();
        let (pid, _) = running_process(&mut state);
        let worker = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        state.resume_thread(worker).unwrap();
        let fault = PageFault {
            addr: VirtAddr(0x8000),
            access: Access::Write,
            kind: FaultKind::Protection,
        };
        state.fault_thread(worker, fault).unwrap();

        assert_eq!(
            state.objects.thread(worker).unwrap().state,
            ThreadState::Terminated
        );
        assert_eq!(
            state.objects.process(pid).unwrap().state,
            ProcessState::Running
        );
    }

    #[test]
    fn test_resume_requires_running_process() {
        let mut state = KernelState::default();
        let pid = state.create_process(&test_image(1), "").unwrap();
        let t = state
            .create_thread(pid, "w", VirtAddr(0x8000), 4096, 20, 0)
            .unwrap();
        assert_eq!(
            state.resume_thread(t),
            Err(KernelError::ProcessNotRunnable(pid))
        );
    }
}
