//! Per-process handle table (object index)
//!
//! Maps small integer handles to kernel objects. The table only stores the
//! object id; the reference each entry stands for is counted in the
//! `ObjectTable`, and callers adjust it around `insert`/`close`.
//!
//! # Properties
//!
//! 1. **Uniqueness**: a live handle value names exactly one entry
//! 2. **No zero handle**: allocation starts at 1
//! 3. **Smallest free first**: closed values are recycled lowest-first
//! 4. **Fail closed**: unknown or closed handles always error

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::types::{Handle, ObjectId, ObjectKind, ThreadId};

/// Who owns a handle entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleOwner {
    /// Lives as long as the process
    Process,
    /// Closed automatically when this thread terminates
    Thread(ThreadId),
}

/// Owner requested by a kernel call, before the caller's id is known
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerType {
    #[default]
    Process,
    Thread,
}

impl OwnerType {
    pub fn for_thread(self, thread: ThreadId) -> HandleOwner {
        match self {
            OwnerType::Process => HandleOwner::Process,
            OwnerType::Thread => HandleOwner::Thread(thread),
        }
    }
}

/// How an entry came to exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleOrigin {
    Created,
    Duplicated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleAttrs {
    pub owner: HandleOwner,
    pub origin: HandleOrigin,
}

impl HandleAttrs {
    pub fn created(owner: HandleOwner) -> Self {
        Self {
            owner,
            origin: HandleOrigin::Created,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleEntry {
    pub object: ObjectId,
    pub kind: ObjectKind,
    pub attrs: HandleAttrs,
}

#[derive(Clone, Debug)]
pub struct HandleTable {
    entries: BTreeMap<u32, HandleEntry>,
    /// Closed values below `next`
    free: BTreeSet<u32>,
    /// Lowest value never handed out
    next: u32,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            free: BTreeSet::new(),
            next: 1,
        }
    }

    /// Store an entry under the smallest free handle value
    pub fn insert(&mut self, entry: HandleEntry) -> KernelResult<Handle> {
        let value = match self.free.pop_first() {
            Some(v) => v,
            None => {
                if self.next >= Handle::PSEUDO_BASE {
                    return Err(KernelError::Overflow);
                }
                let v = self.next;
                self.next += 1;
                v
            }
        };
        self.entries.insert(value, entry);
        Ok(Handle(value))
    }

    /// Add a second entry for the object behind `handle`.
    ///
    /// The caller takes the extra object reference.
    pub fn duplicate(&mut self, handle: Handle, owner: HandleOwner) -> KernelResult<Handle> {
        let entry = *self.get(handle)?;
        self.insert(HandleEntry {
            attrs: HandleAttrs {
                owner,
                origin: HandleOrigin::Duplicated,
            },
            ..entry
        })
    }

    /// Remove an entry. The caller drops the object reference.
    pub fn close(&mut self, handle: Handle) -> KernelResult<HandleEntry> {
        let entry = self
            .entries
            .remove(&handle.0)
            .ok_or(KernelError::InvalidHandle(handle.0))?;
        self.free.insert(handle.0);
        Ok(entry)
    }

    pub fn get(&self, handle: Handle) -> KernelResult<&HandleEntry> {
        self.entries
            .get(&handle.0)
            .ok_or(KernelError::InvalidHandle(handle.0))
    }

    /// Look up an entry and check its object kind
    pub fn get_typed(&self, handle: Handle, kind: ObjectKind) -> KernelResult<ObjectId> {
        let entry = self.get(handle)?;
        if entry.kind != kind {
            return Err(KernelError::WrongObjectType {
                object: entry.object,
                expected: kind,
                found: entry.kind,
            });
        }
        Ok(entry.object)
    }

    /// Remove every entry owned by `thread`
    pub fn drain_owned_by(&mut self, thread: ThreadId) -> Vec<HandleEntry> {
        let owned: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.attrs.owner == HandleOwner::Thread(thread))
            .map(|(&h, _)| h)
            .collect();
        owned
            .into_iter()
            .filter_map(|h| self.close(Handle(h)).ok())
            .collect()
    }

    /// Remove every entry (process teardown)
    pub fn drain(&mut self) -> Vec<HandleEntry> {
        self.free.clear();
        self.next = 1;
        core::mem::take(&mut self.entries).into_values().collect()
    }

    /// Number of entries that refer to `object`
    pub fn count_refs(&self, object: ObjectId) -> usize {
        self.entries.values().filter(|e| e.object == object).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &HandleEntry)> {
        self.entries.iter().map(|(&h, e)| (Handle(h), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64) -> HandleEntry {
        HandleEntry {
            object: ObjectId(id),
            kind: ObjectKind::Semaphore,
            attrs: HandleAttrs::created(HandleOwner::Process),
        }
    }

    #[test]
    fn test_insert_never_returns_zero() {
        let mut table = HandleTable::new();
        let h = table.insert(entry(1)).unwrap();
        assert_eq!(h, Handle(1));
    }

    #[test]
    fn test_handles_unique_while_live() {
        let mut table = HandleTable::new();
        let mut live = BTreeSet::new();
        for round in 0..4u64 {
            for i in 0..8 {
                let h = table.insert(entry(round * 10 + i)).unwrap();
                assert!(live.insert(h), "handle {:?} handed out twice", h);
            }
            // Close every other live handle
            let to_close: Vec<Handle> = live.iter().copied().step_by(2).collect();
            for h in to_close {
                table.close(h).unwrap();
                live.remove(&h);
                assert!(table.get(h).is_err());
            }
        }
        assert_eq!(table.len(), live.len());
    }

    #[test]
    fn test_smallest_free_recycled() {
        let mut table = HandleTable::new();
        let a = table.insert(entry(1)).unwrap();
        let b = table.insert(entry(2)).unwrap();
        let c = table.insert(entry(3)).unwrap();
        table.close(c).unwrap();
        table.close(a).unwrap();

        assert_eq!(table.insert(entry(4)).unwrap(), a);
        assert_eq!(table.insert(entry(5)).unwrap(), c);
        assert_eq!(table.insert(entry(6)).unwrap(), Handle(4));
        assert_eq!(table.get(b).unwrap().object, ObjectId(2));
    }

    #[test]
    fn test_double_close_is_invalid_every_time() {
        let mut table = HandleTable::new();
        let h = table.insert(entry(9)).unwrap();
        table.close(h).unwrap();
        for _ in 0..3 {
            assert_eq!(table.close(h), Err(KernelError::InvalidHandle(h.0)));
        }
        assert_eq!(table.close(Handle(0)), Err(KernelError::InvalidHandle(0)));
    }

    #[test]
    fn test_duplicate() {
        let mut table = HandleTable::new();
        let h = table.insert(entry(7)).unwrap();
        let d = table.duplicate(h, HandleOwner::Process).unwrap();
        assert_ne!(h, d);
        assert_eq!(table.get(d).unwrap().object, ObjectId(7));
        assert_eq!(table.get(d).unwrap().attrs.origin, HandleOrigin::Duplicated);
        assert_eq!(table.count_refs(ObjectId(7)), 2);

        assert!(table.duplicate(Handle(99), HandleOwner::Process).is_err());
    }

    #[test]
    fn test_get_typed() {
        let mut table = HandleTable::new();
        let h = table.insert(entry(3)).unwrap();
        assert_eq!(table.get_typed(h, ObjectKind::Semaphore), Ok(ObjectId(3)));
        assert!(matches!(
            table.get_typed(h, ObjectKind::Mutex),
            Err(KernelError::WrongObjectType { .. })
        ));
    }

    #[test]
    fn test_drain_owned_by_thread() {
        let mut table = HandleTable::new();
        let t = ObjectId(50);
        table.insert(entry(1)).unwrap();
        let owned = table
            .insert(HandleEntry {
                attrs: HandleAttrs::created(HandleOwner::Thread(t)),
                ..entry(2)
            })
            .unwrap();

        let drained = table.drain_owned_by(t);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].object, ObjectId(2));
        assert!(table.get(owned).is_err());
        assert_eq!(table.len(), 1);
    }
}
