//! Kernel integration tests
//!
//! Drive `KernelSystem` through whole quanta with the scripted `MockEngine`.

use epoc_hal::{ExecutionEngine, GuestMemory, HalError, QuantumExit};
use epoc_hal_mock::{MockEngine, Op};
use epoc_kernel::{
    ConfigError, KernelConfig, KernelSystem, ProcessMemory, RunExit, SystemError, TickOutcome,
};
use epoc_kernel_core::{
    guest, Access, CallStatus, ExitInfo, FaultKind, Handle, HandleOwner, HeapBounds, ImageOrigin,
    KernelCall, KernelError, OwnerType, ProcessId, ProcessImage, ProcessState, Protection,
    RegionKind, Segment, ThreadContext, ThreadId, ThreadState, UidType, VirtAddr, WaitOutcome,
    WaitReason,
};

// ============================================================================
// Fixtures
// ============================================================================

const APP_UID: u32 = 0x1020_4060;

/// Image with one code page at `entry`, static data at 0x10000 and a heap
/// reserved over [0x400000, 0x404000) with one page committed
fn image(uid: u32, entry: u32, priority: u8) -> ProcessImage {
    ProcessImage {
        uid_type: UidType(0x1000_007A, 0x100039CE, uid),
        name: String::from("app"),
        origin: ImageOrigin::Executable {
            path: String::from("c:\\sys\\bin\\app.exe"),
        },
        entry: VirtAddr(entry),
        segments: vec![
            Segment {
                vaddr: VirtAddr(entry & !0xFFF),
                data: vec![0xE1, 0xA0, 0x00, 0x00],
                mem_size: 0x1000,
                kind: RegionKind::Code,
                protection: Protection::RX,
            },
            Segment {
                vaddr: VirtAddr(0x10000),
                data: vec![1, 2, 3, 4],
                mem_size: 0x1000,
                kind: RegionKind::StaticData,
                protection: Protection::RW,
            },
        ],
        stack_size: 4096,
        heap: Some(HeapBounds {
            base: VirtAddr(0x40_0000),
            min_size: 0x1000,
            max_size: 0x4000,
        }),
        priority,
    }
}

fn system_with(programs: Vec<(u32, Vec<Op>)>) -> KernelSystem<MockEngine> {
    let mut engine = MockEngine::new();
    for (entry, ops) in programs {
        engine.load_program(VirtAddr(entry), ops);
    }
    KernelSystem::with_defaults(engine)
}

/// Create and run a process, returning it and its primary thread
fn start(system: &KernelSystem<MockEngine>, entry: u32, priority: u8) -> (ProcessId, ThreadId) {
    let pid = system
        .create_process(&image(APP_UID, entry, priority), "")
        .unwrap();
    system.run(pid).unwrap();
    (pid, primary(system, pid))
}

fn primary(system: &KernelSystem<MockEngine>, pid: ProcessId) -> ThreadId {
    system
        .state()
        .objects
        .process(pid)
        .unwrap()
        .primary_thread
        .unwrap()
}

fn ran(outcome: TickOutcome) -> (ThreadId, RunExit) {
    match outcome {
        TickOutcome::Ran { thread, exit } => (thread, exit),
        TickOutcome::Idle { .. } => panic!("expected a thread to run, kernel was idle"),
    }
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_installed_image() {
    let mut system = system_with(vec![(0x8000, vec![Op::Spin])]);
    system.install_image(image(APP_UID, 0x8000, 20));
    assert!(system.is_installed(APP_UID));

    let pid = system.load(APP_UID).unwrap();
    assert_eq!(system.processes_by_uid(APP_UID), vec![pid]);

    let tid = primary(&system, pid);
    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Preempted));
}

#[test]
fn test_load_unknown_uid() {
    let mut system = system_with(vec![]);
    let err = system.load(0xDEAD).unwrap_err();
    assert_eq!(err.kernel_error(), Some(KernelError::UnknownUid(0xDEAD)));
    assert!(system.processes_by_uid(0xDEAD).is_empty());
}

#[test]
fn test_process_scenario() {
    let mut system = system_with(vec![(0x8000, vec![Op::Spin])]);
    let (pid, tid) = start(&system, 0x8000, 20);

    {
        let state = system.state();
        let p = state.objects.process(pid).unwrap();
        assert_eq!(p.threads, vec![tid]);
        let t = state.objects.thread(tid).unwrap();
        assert_eq!(t.state, ThreadState::Ready);
        assert_eq!(t.context.pc(), VirtAddr(0x8000));

        let code = p.page_table.region_at(VirtAddr(0x8000)).unwrap();
        assert_eq!(code.kind, RegionKind::Code);
        let stack = p
            .page_table
            .regions()
            .find(|r| r.kind == RegionKind::Stack)
            .unwrap();
        assert_eq!(stack.size, 4096);
    }

    let sem = system.state_mut().create_semaphore(String::from("gate"), 0);
    let outcome = system
        .state_mut()
        .block(tid, WaitReason::Semaphore, Some(sem), None)
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Blocked);
    assert_eq!(
        system.tick().unwrap(),
        TickOutcome::Idle {
            next_deadline: None
        }
    );

    system.state_mut().wake(tid, guest::KERR_NONE).unwrap();
    assert_eq!(ran(system.tick().unwrap()).0, tid);
    system.release(sem).unwrap();
}

#[test]
fn test_run_twice_rejected() {
    let system = system_with(vec![]);
    let (pid, _) = start(&system, 0x8000, 20);

    let err = system.run(pid).unwrap_err();
    assert_eq!(err.kernel_error(), Some(KernelError::AlreadyRunning(pid)));
    assert_eq!(system.state().objects.process(pid).unwrap().threads.len(), 1);
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn test_round_robin_fairness() {
    let mut system = system_with(vec![(0x8000, vec![Op::Spin, Op::Spin, Op::Spin])]);
    let threads: Vec<ThreadId> = (0..3).map(|_| start(&system, 0x8000, 20).1).collect();

    for _ in 0..6 {
        ran(system.tick().unwrap());
    }

    let schedule = system.engine().schedule();
    assert_eq!(&schedule[..3], threads.as_slice());
    assert_eq!(&schedule[3..6], threads.as_slice());
}

#[test]
fn test_woken_thread_preempts() {
    let mut system = system_with(vec![
        (0x8000, vec![Op::Spin; 8]),
        (0x9000, vec![Op::Spin]),
    ]);
    let (_, low) = start(&system, 0x8000, 10);
    let (_, high) = start(&system, 0x9000, 30);

    let sem = system.state_mut().create_semaphore(String::from("gate"), 0);
    system
        .state_mut()
        .block(high, WaitReason::Semaphore, Some(sem), None)
        .unwrap();

    assert_eq!(ran(system.tick().unwrap()).0, low);
    assert_eq!(ran(system.tick().unwrap()).0, low);

    let preempt = system.state_mut().semaphore_signal(sem, 1).unwrap();
    assert!(preempt);
    assert_eq!(ran(system.tick().unwrap()), (high, RunExit::Preempted));
    assert_eq!(ran(system.tick().unwrap()).0, high);
    assert_eq!(ran(system.tick().unwrap()).0, low);
}

#[test]
fn test_idle_when_nothing_runs() {
    let mut system = system_with(vec![]);
    assert_eq!(
        system.tick().unwrap(),
        TickOutcome::Idle {
            next_deadline: None
        }
    );
    assert_eq!(system.run_until_idle(10).unwrap(), 0);
    assert_eq!(system.ticks(), 0);
}

#[test]
fn test_sleep_wakes_after_deadline() {
    let mut system = system_with(vec![(
        0x8000,
        vec![Op::Call(KernelCall::Sleep { micros: 5_000 }), Op::Spin],
    )]);
    let (_, tid) = start(&system, 0x8000, 20);

    // The mock charges one millisecond per quantum before the call runs
    let (_, exit) = ran(system.tick().unwrap());
    assert_eq!(exit, RunExit::Call(CallStatus::Blocked));
    assert_eq!(
        system.tick().unwrap(),
        TickOutcome::Idle {
            next_deadline: Some(6_000_000)
        }
    );

    system.engine_mut().advance_time(5_000_000);
    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Preempted));
    assert_eq!(system.engine().trace(tid).unwrap().results, vec![guest::KERR_NONE]);
}

#[test]
fn test_priority_inheritance_through_guest_calls() {
    let mut system = system_with(vec![
        (
            0x8000,
            vec![
                Op::Call(KernelCall::CreateMutex {
                    owner: OwnerType::Process,
                }),
                Op::Call(KernelCall::MutexWait { mutex: Handle(1) }),
                Op::Call(KernelCall::CreateThread {
                    name: String::from("urgent"),
                    entry: VirtAddr(0x8100),
                    stack_size: 4096,
                    priority: Some(30),
                    arg: 0,
                }),
                Op::Call(KernelCall::ResumeThread { thread: Handle(2) }),
                Op::Call(KernelCall::MutexSignal { mutex: Handle(1) }),
            ],
        ),
        (
            0x8100,
            vec![
                Op::Call(KernelCall::MutexWait { mutex: Handle(1) }),
                Op::Call(KernelCall::MutexSignal { mutex: Handle(1) }),
            ],
        ),
    ]);
    let (pid, main) = start(&system, 0x8000, 10);

    for _ in 0..4 {
        assert_eq!(ran(system.tick().unwrap()).0, main);
    }
    let urgent = system.resolve(pid, Handle(2)).unwrap();

    // The urgent thread blocks on the mutex and lends its priority
    assert_eq!(
        ran(system.tick().unwrap()),
        (urgent, RunExit::Call(CallStatus::Blocked))
    );
    assert_eq!(system.state().objects.thread(main).unwrap().priority, 30);

    // Release hands the mutex over and drops the boost
    assert_eq!(ran(system.tick().unwrap()).0, main);
    assert_eq!(system.state().objects.thread(main).unwrap().priority, 10);
    let mutex = system.resolve(pid, Handle(1)).unwrap();
    assert_eq!(
        system.state().objects.mutex(mutex).unwrap().owner,
        Some(urgent)
    );
    assert_eq!(ran(system.tick().unwrap()).0, urgent);

    system.run_until_idle(16).unwrap();
    assert_eq!(
        system.engine().trace(main).unwrap().results,
        vec![1, guest::KERR_NONE, 2, guest::KERR_NONE, guest::KERR_NONE]
    );
    assert_eq!(
        system.engine().trace(urgent).unwrap().results,
        vec![guest::KERR_NONE, guest::KERR_NONE]
    );
    assert_eq!(
        system.state().objects.process(pid).unwrap().state,
        ProcessState::Exited
    );
    assert!(system.debug_handle().check_invariants().is_empty());
}

// ============================================================================
// Handles
// ============================================================================

#[test]
fn test_double_close_from_guest() {
    let mut system = system_with(vec![(
        0x8000,
        vec![
            Op::Call(KernelCall::CreateSemaphore {
                initial: 0,
                owner: OwnerType::Process,
            }),
            Op::Call(KernelCall::CloseHandle { handle: Handle(1) }),
            Op::Call(KernelCall::CloseHandle { handle: Handle(1) }),
            Op::Call(KernelCall::CloseHandle { handle: Handle(1) }),
        ],
    )]);
    let (pid, tid) = start(&system, 0x8000, 20);

    system.run_until_idle(16).unwrap();
    assert_eq!(
        system.engine().trace(tid).unwrap().results,
        vec![1, guest::KERR_NONE, guest::KERR_BAD_HANDLE, guest::KERR_BAD_HANDLE]
    );
    assert!(system.engine().finished(tid));
    assert_eq!(
        system.state().objects.process(pid).unwrap().state,
        ProcessState::Exited
    );
}

#[test]
fn test_double_close_from_host() {
    let system = system_with(vec![]);
    let (pid, _) = start(&system, 0x8000, 20);

    let mut state = system.state_mut();
    let sem = state.create_semaphore(String::from("s"), 0);
    let h = state.adopt_handle(pid, sem, HandleOwner::Process).unwrap();
    state.close_handle(pid, h).unwrap();
    for _ in 0..3 {
        assert_eq!(
            state.close_handle(pid, h),
            Err(KernelError::InvalidHandle(h.0))
        );
    }
    assert!(state.objects.get(sem).is_none());
}

// ============================================================================
// Memory and faults
// ============================================================================

#[test]
fn test_demand_paging_retries_access() {
    let mut system = system_with(vec![(
        0x8000,
        vec![
            Op::Write {
                addr: VirtAddr(0x40_2000),
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            },
            Op::Read {
                addr: VirtAddr(0x40_2000),
                len: 4,
            },
            Op::Spin,
        ],
    )]);
    let (pid, tid) = start(&system, 0x8000, 20);

    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Paged));
    assert_eq!(
        system.state().objects.thread(tid).unwrap().fault_retry,
        Some(VirtAddr(0x40_2000))
    );

    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Preempted));
    assert_eq!(
        system.engine().trace(tid).unwrap().reads,
        vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]
    );
    assert_eq!(system.state().objects.thread(tid).unwrap().fault_retry, None);
    assert_eq!(
        system.debug_handle().read_memory(pid, VirtAddr(0x40_2000), 4),
        Ok(vec![0xDE, 0xAD, 0xBE, 0xEF])
    );
}

#[test]
fn test_protection_fault_kills_process() {
    let mut system = system_with(vec![(
        0x8000,
        vec![Op::Write {
            addr: VirtAddr(0x8000),
            data: vec![0],
        }],
    )]);
    let (pid, tid) = start(&system, 0x8000, 20);

    let (_, exit) = ran(system.tick().unwrap());
    let RunExit::Faulted(fault) = exit else {
        panic!("expected a fault, got {:?}", exit);
    };
    assert_eq!(fault.kind, FaultKind::Protection);
    assert_eq!(fault.access, Access::Write);

    let info = system.debug_handle().process(pid).unwrap();
    assert_eq!(info.state, ProcessState::Exited);
    assert_eq!(info.exit, Some(ExitInfo::exec_fault()));
    assert_eq!(
        system.state().objects.thread(tid).unwrap().stats.faults,
        1
    );
    assert!(matches!(system.tick().unwrap(), TickOutcome::Idle { .. }));
}

#[test]
fn test_unmapped_fault_kills_only_worker() {
    let mut system = system_with(vec![
        (
            0x8000,
            vec![
                Op::Call(KernelCall::CreateThread {
                    name: String::from("worker"),
                    entry: VirtAddr(0x8200),
                    stack_size: 4096,
                    priority: Some(25),
                    arg: 0,
                }),
                Op::Call(KernelCall::ResumeThread { thread: Handle(1) }),
                Op::Spin,
            ],
        ),
        (0x8200, vec![Op::Read { addr: VirtAddr(0x100), len: 4 }]),
    ]);
    let (pid, main) = start(&system, 0x8000, 20);

    ran(system.tick().unwrap());
    ran(system.tick().unwrap());
    let worker = system.resolve(pid, Handle(1)).unwrap();
    let (thread, exit) = ran(system.tick().unwrap());
    assert_eq!(thread, worker);
    assert!(matches!(exit, RunExit::Faulted(f) if f.kind == FaultKind::Unmapped));

    let state = system.state();
    assert_eq!(
        state.objects.thread(worker).unwrap().state,
        ThreadState::Terminated
    );
    assert_eq!(state.objects.process(pid).unwrap().state, ProcessState::Running);
    assert_ne!(
        state.objects.thread(main).unwrap().state,
        ThreadState::Terminated
    );
}

// ============================================================================
// Engine exits
// ============================================================================

#[test]
fn test_breakpoint_suspends_until_resumed() {
    let mut system = system_with(vec![(0x8000, vec![Op::Breakpoint, Op::Spin])]);
    let (_, tid) = start(&system, 0x8000, 20);
    let debug = system.debug_handle();

    assert_eq!(
        ran(system.tick().unwrap()),
        (tid, RunExit::Breakpoint(VirtAddr(0x8000)))
    );
    assert!(debug.thread(tid).unwrap().suspended);
    assert!(matches!(system.tick().unwrap(), TickOutcome::Idle { .. }));

    debug.resume(tid).unwrap();
    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Preempted));
}

#[test]
fn test_undefined_instruction_crashes_process() {
    let mut system = system_with(vec![(0x8000, vec![Op::Undefined])]);
    let (pid, tid) = start(&system, 0x8000, 20);

    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Crashed));
    let exit = system.debug_handle().process(pid).unwrap().exit.unwrap();
    assert_eq!(exit.category, "KERN-EXEC");
    assert_eq!(exit.reason, 3);
}

#[test]
fn test_missing_program_crashes() {
    let mut system = system_with(vec![]);
    let (_, tid) = start(&system, 0x8000, 20);
    assert_eq!(ran(system.tick().unwrap()), (tid, RunExit::Crashed));
}

/// Engine whose backend always fails
struct BrokenEngine;

impl ExecutionEngine for BrokenEngine {
    fn run_quantum(
        &mut self,
        _thread: ThreadId,
        _context: &mut ThreadContext,
        _memory: &mut dyn GuestMemory,
        _budget: u64,
    ) -> Result<QuantumExit, HalError> {
        Err(HalError::Engine(String::from("backend gone")))
    }

    fn now_nanos(&self) -> u64 {
        0
    }
}

#[test]
fn test_engine_failure_propagates() {
    let mut system = KernelSystem::with_defaults(BrokenEngine);
    let pid = system
        .create_process(&image(APP_UID, 0x8000, 20), "")
        .unwrap();
    system.run(pid).unwrap();

    let err = system.tick().unwrap_err();
    assert!(matches!(err, SystemError::Hal(HalError::Engine(_))));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_from_json() {
    let config = KernelConfig::from_json(r#"{ "default_priority": 12, "quantum_budget": 500 }"#)
        .unwrap();
    let system = KernelSystem::new(MockEngine::new(), config).unwrap();
    assert_eq!(system.config().quantum_budget, 500);
    assert_eq!(system.state().limits.default_priority, 12);
}

#[test]
fn test_config_rejected() {
    let err = KernelConfig::from_json(r#"{ "address_ceiling": 4294963200 }"#).unwrap_err();
    assert!(matches!(
        err,
        SystemError::Config(ConfigError::CeilingTooHigh(0xFFFF_F000))
    ));

    let config = KernelConfig {
        quantum_budget: 0,
        ..KernelConfig::default()
    };
    assert!(matches!(
        KernelSystem::new(MockEngine::new(), config),
        Err(SystemError::Config(ConfigError::ZeroBudget))
    ));
}

#[test]
fn test_host_terminates_process() {
    let mut system = system_with(vec![(0x8000, vec![Op::Spin; 4])]);
    let (pid, _) = start(&system, 0x8000, 20);
    ran(system.tick().unwrap());

    system.terminate_process(pid, -3).unwrap();
    let info = system.debug_handle().process(pid).unwrap();
    assert_eq!(info.exit, Some(ExitInfo::kill(-3)));
    assert!(matches!(system.tick().unwrap(), TickOutcome::Idle { .. }));
    assert!(system.processes_by_uid(APP_UID).is_empty());
}

#[test]
fn test_engine_told_only_about_started_threads() {
    let mut system = system_with(vec![(
        0x8000,
        vec![
            Op::Call(KernelCall::CreateThread {
                name: String::from("never-run"),
                entry: VirtAddr(0x9000),
                stack_size: 4096,
                priority: None,
                arg: 0,
            }),
            Op::Call(KernelCall::ExitProcess { reason: 0 }),
        ],
    )]);
    let (pid, tid) = start(&system, 0x8000, 20);

    system.run_until_idle(8).unwrap();
    assert_eq!(
        system.state().objects.process(pid).unwrap().state,
        ProcessState::Exited
    );
    assert_eq!(system.engine().exited(), &[tid][..]);
}

// ============================================================================
// Engine memory view
// ============================================================================

#[test]
fn test_process_memory_translates() {
    let system = system_with(vec![]);
    let (pid, _) = start(&system, 0x8000, 20);
    let mut state = system.state_mut();
    let memory = ProcessMemory::new(&mut state, pid);

    let first = memory.translate(VirtAddr(0x10000), Access::Read).unwrap();
    let later = memory.translate(VirtAddr(0x10002), Access::Read).unwrap();
    assert_eq!(later.chunk, first.chunk);
    assert_eq!(later.offset, first.offset + 2);

    let fault = memory.translate(VirtAddr(0x100), Access::Read).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Unmapped);
    // Heap is reserved past its committed page
    let fault = memory
        .translate(VirtAddr(0x40_1000), Access::Read)
        .unwrap_err();
    assert_eq!(fault.kind, FaultKind::Uncommitted);
    let fault = memory.translate(VirtAddr(0x8000), Access::Write).unwrap_err();
    assert_eq!(fault.kind, FaultKind::Protection);
}
