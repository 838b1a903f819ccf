//! Whole-state consistency checks
//!
//! Runtime-checkable invariants that must hold between kernel operations.
//! The runtime asserts them after every tick in debug builds and tests call
//! them after each scenario.
//!
//! # Invariants
//!
//! 1. **Reference accounting**: no object's count falls below the
//!    references the rest of the state holds on it
//! 2. **Handle validity**: every handle entry names a live object of the
//!    recorded kind
//! 3. **Ready queues**: exactly the `Ready`, unsuspended threads are queued,
//!    each once, at their effective priority
//! 4. **Wait consistency**: blocked threads sit in their object's wait queue
//!    and wait queues hold only blocked threads
//! 5. **Process threads**: every thread's process lists it, running
//!    processes have a primary thread
//! 6. **Address-space isolation**: private chunks are mapped at most once
//! 7. **ID monotonicity**: no live id at or above the next id
//! 8. **Thread stacks**: every stack region is the stack of a live thread of
//!    its process, and every live thread's stack is mapped

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::memory::RegionKind;
use crate::object::ObjectBody;
use crate::process::ProcessState;
use crate::state::KernelState;
use crate::thread::{ThreadState, WaitReason};
use crate::types::{ObjectId, ObjectKind, VirtAddr};

/// An invariant violation with details
#[derive(Clone, Debug)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: &'static str,
    /// Description of what went wrong
    pub description: String,
}

fn violation(invariant: &'static str, description: String) -> InvariantViolation {
    InvariantViolation {
        invariant,
        description,
    }
}

/// Check all kernel invariants.
///
/// Returns a list of violations (empty if all invariants hold).
pub fn check_all_invariants(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    violations.extend(check_reference_counts(state));
    violations.extend(check_handle_validity(state));
    violations.extend(check_ready_queues(state));
    violations.extend(check_wait_consistency(state));
    violations.extend(check_process_threads(state));
    violations.extend(check_private_chunks(state));
    violations.extend(check_id_monotonicity(state));
    violations.extend(check_thread_stacks(state));

    violations
}

/// Invariant 1: counts match the references held elsewhere.
///
/// Creator references are invisible to the state, so a count may exceed
/// the tally but never fall below it.
fn check_reference_counts(state: &KernelState) -> Vec<InvariantViolation> {
    let mut held: BTreeMap<ObjectId, u32> = BTreeMap::new();
    let mut add = |id: ObjectId| *held.entry(id).or_insert(0) += 1;

    for obj in state.objects.iter() {
        match &obj.body {
            ObjectBody::Process(p) => {
                for (_, entry) in p.handles.iter() {
                    add(entry.object);
                }
                for region in p.page_table.regions() {
                    add(region.chunk);
                }
                if let Some(primary) = p.primary_thread {
                    add(primary);
                }
                if p.state == ProcessState::Running {
                    add(obj.id);
                }
            }
            ObjectBody::Thread(t) => {
                if t.state.is_live() {
                    add(obj.id);
                }
                if let Some(waited) = t.wait.and_then(|w| w.object) {
                    add(waited);
                }
            }
            _ => {}
        }
    }

    let mut violations = Vec::new();
    for obj in state.objects.iter() {
        let tally = held.get(&obj.id).copied().unwrap_or(0);
        if obj.ref_count < tally {
            violations.push(violation(
                "reference_accounting",
                format!(
                    "{:?} {} has count {} but {} references are held",
                    obj.kind(),
                    obj.id,
                    obj.ref_count,
                    tally
                ),
            ));
        }
        if obj.ref_count == 0 {
            violations.push(violation(
                "reference_accounting",
                format!("{:?} {} is alive with a zero count", obj.kind(), obj.id),
            ));
        }
    }
    for id in held.keys() {
        if !state.objects.contains(*id) {
            violations.push(violation(
                "reference_accounting",
                format!("reference held on destroyed object {}", id),
            ));
        }
    }
    violations
}

/// Invariant 2: handle entries point at live objects of the right kind
fn check_handle_validity(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for obj in state.objects.iter() {
        let ObjectBody::Process(p) = &obj.body else {
            continue;
        };
        for (handle, entry) in p.handles.iter() {
            if handle.0 == 0 || handle.is_pseudo() {
                violations.push(violation(
                    "handle_validity",
                    format!("process {} holds reserved handle {}", obj.id, handle),
                ));
            }
            match state.objects.kind_of(entry.object) {
                Ok(kind) if kind == entry.kind => {}
                Ok(kind) => violations.push(violation(
                    "handle_validity",
                    format!(
                        "handle {} in {} records {:?} but {} is {:?}",
                        handle, obj.id, entry.kind, entry.object, kind
                    ),
                )),
                Err(_) => violations.push(violation(
                    "handle_validity",
                    format!("handle {} in {} dangles ({})", handle, obj.id, entry.object),
                )),
            }
        }
    }
    violations
}

/// Invariant 3: queues hold exactly the schedulable threads
fn check_ready_queues(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut seen: BTreeMap<ObjectId, usize> = BTreeMap::new();
    for tid in state.scheduler.ready_threads() {
        *seen.entry(tid).or_insert(0) += 1;
    }

    for (&tid, &count) in &seen {
        if count > 1 {
            violations.push(violation(
                "ready_queues",
                format!("thread {} queued {} times", tid, count),
            ));
        }
        match state.objects.thread(tid) {
            Ok(t) if t.is_schedulable() => {
                if state.scheduler.queued_level(tid) != Some(t.priority) {
                    violations.push(violation(
                        "ready_queues",
                        format!("thread {} queued away from priority {}", tid, t.priority),
                    ));
                }
            }
            Ok(t) => violations.push(violation(
                "ready_queues",
                format!("thread {} queued while {:?}", tid, t.state),
            )),
            Err(_) => violations.push(violation(
                "ready_queues",
                format!("destroyed thread {} is queued", tid),
            )),
        }
    }

    for id in state.objects.ids_of_kind(ObjectKind::Thread) {
        if let Ok(t) = state.objects.thread(id) {
            if t.is_schedulable() && !seen.contains_key(&id) {
                violations.push(violation(
                    "ready_queues",
                    format!("ready thread {} is not queued (lost wakeup)", id),
                ));
            }
            if t.state == ThreadState::Running && state.scheduler.current != Some(id) {
                violations.push(violation(
                    "ready_queues",
                    format!("thread {} running outside the current quantum", id),
                ));
            }
        }
    }
    violations
}

/// Invariant 4: wait records and wait queues agree
fn check_wait_consistency(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    for id in state.objects.ids_of_kind(ObjectKind::Thread) {
        let Ok(t) = state.objects.thread(id) else {
            continue;
        };
        match (t.state, t.wait) {
            (ThreadState::Blocked, None) => violations.push(violation(
                "wait_consistency",
                format!("thread {} blocked with no wait record", id),
            )),
            (ThreadState::Blocked, Some(w)) => {
                let queued = match (w.reason, w.object) {
                    (WaitReason::Semaphore, Some(o)) => state
                        .objects
                        .semaphore(o)
                        .is_ok_and(|s| s.waiters.contains(&id)),
                    (WaitReason::Mutex, Some(o)) => state
                        .objects
                        .mutex(o)
                        .is_ok_and(|m| m.waiters.contains(&id)),
                    _ => true,
                };
                if !queued {
                    violations.push(violation(
                        "wait_consistency",
                        format!("thread {} is missing from its wait queue", id),
                    ));
                }
            }
            (state_now, Some(_)) => violations.push(violation(
                "wait_consistency",
                format!("thread {} is {:?} but keeps a wait record", id, state_now),
            )),
            _ => {}
        }
    }

    for obj in state.objects.iter() {
        let waiters = match &obj.body {
            ObjectBody::Semaphore(s) => &s.waiters,
            ObjectBody::Mutex(m) => &m.waiters,
            _ => continue,
        };
        for &w in waiters {
            let blocked_here = state.objects.thread(w).is_ok_and(|t| {
                t.state == ThreadState::Blocked && t.wait.and_then(|w| w.object) == Some(obj.id)
            });
            if !blocked_here {
                violations.push(violation(
                    "wait_consistency",
                    format!("{} waits on {} without being blocked there", w, obj.id),
                ));
            }
        }
        if let ObjectBody::Mutex(m) = &obj.body {
            if let Some(owner) = m.owner {
                let holds = state
                    .objects
                    .thread(owner)
                    .is_ok_and(|t| t.held_mutexes.contains(&obj.id));
                if !holds {
                    violations.push(violation(
                        "wait_consistency",
                        format!("mutex {} owner {} does not record holding it", obj.id, owner),
                    ));
                }
            }
        }
    }
    violations
}

/// Invariant 5: thread/process back-references
fn check_process_threads(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for obj in state.objects.iter() {
        match &obj.body {
            ObjectBody::Thread(t) => {
                if let Ok(p) = state.objects.process(t.process) {
                    if !p.threads.contains(&obj.id) {
                        violations.push(violation(
                            "process_threads",
                            format!("thread {} not listed by process {}", obj.id, t.process),
                        ));
                    }
                }
            }
            ObjectBody::Process(p) => {
                if p.state == ProcessState::Running && p.primary_thread.is_none() {
                    violations.push(violation(
                        "process_threads",
                        format!("running process {} has no primary thread", obj.id),
                    ));
                }
                for &tid in &p.threads {
                    if state.objects.thread(tid).map(|t| t.process) != Ok(obj.id) {
                        violations.push(violation(
                            "process_threads",
                            format!("process {} lists foreign thread {}", obj.id, tid),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    violations
}

/// Invariant 6: private chunks back at most one region
fn check_private_chunks(state: &KernelState) -> Vec<InvariantViolation> {
    let mut mapped: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();
    for obj in state.objects.iter() {
        if let ObjectBody::Process(p) = &obj.body {
            for region in p.page_table.regions() {
                mapped.entry(region.chunk).or_default().push(obj.id);
            }
        }
    }

    let mut violations = Vec::new();
    for (chunk, owners) in mapped {
        let shared = state.objects.chunk(chunk).is_ok_and(|c| c.shared);
        let mut distinct = owners.clone();
        distinct.dedup();
        if !shared && distinct.len() > 1 {
            violations.push(violation(
                "address_space_isolation",
                format!("private chunk {} mapped by {:?}", chunk, distinct),
            ));
        }
    }
    violations
}

/// Invariant 7: ids only grow
fn check_id_monotonicity(state: &KernelState) -> Vec<InvariantViolation> {
    let next = state.objects.next_id();
    state
        .objects
        .iter()
        .filter(|o| o.id.0 >= next)
        .map(|o| {
            violation(
                "id_monotonicity",
                format!("object {} not below next id {}", o.id, next),
            )
        })
        .collect()
}

/// Invariant 8: stacks die with their threads
fn check_thread_stacks(state: &KernelState) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    for obj in state.objects.iter() {
        let ObjectBody::Process(p) = &obj.body else {
            continue;
        };
        let stacks: Vec<(ObjectId, VirtAddr)> = p
            .threads
            .iter()
            .filter_map(|&tid| {
                let t = state.objects.thread(tid).ok()?;
                let base = t.stack.filter(|_| t.state != ThreadState::Terminated)?;
                Some((tid, base))
            })
            .collect();

        for region in p.page_table.regions() {
            if region.kind == RegionKind::Stack
                && !stacks.iter().any(|&(_, base)| base == region.start)
            {
                violations.push(violation(
                    "thread_stacks",
                    format!(
                        "stack at {} in process {} has no live thread",
                        region.start, obj.id
                    ),
                ));
            }
        }
        for &(tid, base) in &stacks {
            let mapped = p
                .page_table
                .region_at(base)
                .is_some_and(|r| r.kind == RegionKind::Stack && r.start == base);
            if !mapped {
                violations.push(violation(
                    "thread_stacks",
                    format!("thread {} lost its stack at {}", tid, base),
                ));
            }
        }
    }
    violations
}
