//! Kernel object table
//!
//! The single owner of every kernel object. Objects refer to each other by
//! `ObjectId` only, and each object carries the strong reference count that
//! decides when it is destroyed.
//!
//! Reference counting here is bookkeeping only: `release` reports when a
//! count reaches zero and `KernelState` performs the teardown.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::memory::Chunk;
use crate::process::Process;
use crate::sync::{Mutex, Semaphore};
use crate::thread::Thread;
use crate::types::{ObjectId, ObjectKind};

/// Type-specific object state
#[derive(Debug)]
pub enum ObjectBody {
    Process(Process),
    Thread(Thread),
    Semaphore(Semaphore),
    Mutex(Mutex),
    Chunk(Chunk),
}

impl ObjectBody {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectBody::Process(_) => ObjectKind::Process,
            ObjectBody::Thread(_) => ObjectKind::Thread,
            ObjectBody::Semaphore(_) => ObjectKind::Semaphore,
            ObjectBody::Mutex(_) => ObjectKind::Mutex,
            ObjectBody::Chunk(_) => ObjectKind::Chunk,
        }
    }
}

#[derive(Debug)]
pub struct KernelObject {
    pub id: ObjectId,
    pub name: String,
    pub ref_count: u32,
    pub body: ObjectBody,
}

impl KernelObject {
    pub fn kind(&self) -> ObjectKind {
        self.body.kind()
    }
}

macro_rules! typed_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, id: ObjectId) -> KernelResult<&$ty> {
            match self.objects.get(&id).map(|o| &o.body) {
                Some(ObjectBody::$variant(inner)) => Ok(inner),
                Some(other) => Err(KernelError::WrongObjectType {
                    object: id,
                    expected: ObjectKind::$variant,
                    found: other.kind(),
                }),
                None => Err(KernelError::ObjectNotFound(id)),
            }
        }

        pub fn $get_mut(&mut self, id: ObjectId) -> KernelResult<&mut $ty> {
            match self.objects.get_mut(&id).map(|o| &mut o.body) {
                Some(ObjectBody::$variant(inner)) => Ok(inner),
                Some(other) => Err(KernelError::WrongObjectType {
                    object: id,
                    expected: ObjectKind::$variant,
                    found: other.kind(),
                }),
                None => Err(KernelError::ObjectNotFound(id)),
            }
        }
    };
}

pub struct ObjectTable {
    objects: BTreeMap<ObjectId, KernelObject>,
    next_id: u64,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a new object holding one reference
    pub fn insert(&mut self, name: String, body: ObjectBody) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(
            id,
            KernelObject {
                id,
                name,
                ref_count: 1,
                body,
            },
        );
        id
    }

    /// Take one more reference
    pub fn retain(&mut self, id: ObjectId) -> KernelResult<u32> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(KernelError::ObjectNotFound(id))?;
        obj.ref_count = obj.ref_count.checked_add(1).ok_or(KernelError::Overflow)?;
        Ok(obj.ref_count)
    }

    /// Drop one reference and return what is left
    pub fn release(&mut self, id: ObjectId) -> KernelResult<u32> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(KernelError::ObjectNotFound(id))?;
        obj.ref_count = obj.ref_count.checked_sub(1).ok_or(KernelError::Overflow)?;
        Ok(obj.ref_count)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<KernelObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&KernelObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut KernelObject> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn kind_of(&self, id: ObjectId) -> KernelResult<ObjectKind> {
        self.get(id)
            .map(KernelObject::kind)
            .ok_or(KernelError::ObjectNotFound(id))
    }

    pub fn ref_count(&self, id: ObjectId) -> Option<u32> {
        self.get(id).map(|o| o.ref_count)
    }

    /// Next id to be handed out
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelObject> {
        self.objects.values()
    }

    pub fn ids_of_kind(&self, kind: ObjectKind) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| o.kind() == kind)
            .map(|o| o.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    typed_accessors!(process, process_mut, Process, Process);
    typed_accessors!(thread, thread_mut, Thread, Thread);
    typed_accessors!(semaphore, semaphore_mut, Semaphore, Semaphore);
    typed_accessors!(mutex, mutex_mut, Mutex, Mutex);
    typed_accessors!(chunk, chunk_mut, Chunk, Chunk);
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_monotonic() {
        let mut table = ObjectTable::new();
        let a = table.insert(String::from("a"), ObjectBody::Semaphore(Semaphore::new(0)));
        let b = table.insert(String::from("b"), ObjectBody::Mutex(Mutex::default()));
        table.remove(a);
        let c = table.insert(String::from("c"), ObjectBody::Semaphore(Semaphore::new(1)));
        assert!(a < b && b < c);
        assert_eq!(table.next_id(), c.0 + 1);
    }

    #[test]
    fn test_retain_release() {
        let mut table = ObjectTable::new();
        let id = table.insert(String::new(), ObjectBody::Semaphore(Semaphore::new(0)));
        assert_eq!(table.ref_count(id), Some(1));
        assert_eq!(table.retain(id), Ok(2));
        assert_eq!(table.release(id), Ok(1));
        assert_eq!(table.release(id), Ok(0));
        assert_eq!(table.release(id), Err(KernelError::Overflow));
        assert_eq!(
            table.retain(ObjectId(99)),
            Err(KernelError::ObjectNotFound(ObjectId(99)))
        );
    }

    #[test]
    fn test_typed_accessors() {
        let mut table = ObjectTable::new();
        let id = table.insert(String::new(), ObjectBody::Semaphore(Semaphore::new(3)));
        assert_eq!(table.semaphore(id).unwrap().count, 3);
        table.semaphore_mut(id).unwrap().count = 4;
        assert_eq!(table.semaphore(id).unwrap().count, 4);

        assert_eq!(
            table.mutex(id).unwrap_err(),
            KernelError::WrongObjectType {
                object: id,
                expected: ObjectKind::Mutex,
                found: ObjectKind::Semaphore,
            }
        );
        assert!(matches!(
            table.thread(ObjectId(42)),
            Err(KernelError::ObjectNotFound(_))
        ));
    }
}
