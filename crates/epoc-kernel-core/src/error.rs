//! Kernel error taxonomy
//!
//! Every fallible core operation returns `KernelResult<T>`. Errors that reach
//! guest code through a kernel call are converted with
//! [`KernelError::guest_code`] into the EPOC `KErr*` value placed in r0.

use thiserror::Error;

use crate::thread::ThreadState;
use crate::types::{ObjectId, ObjectKind};

/// EPOC guest error codes
pub mod guest {
    pub const KERR_NONE: i32 = 0;
    pub const KERR_NOT_FOUND: i32 = -1;
    pub const KERR_GENERAL: i32 = -2;
    pub const KERR_CANCEL: i32 = -3;
    pub const KERR_NO_MEMORY: i32 = -4;
    pub const KERR_NOT_SUPPORTED: i32 = -5;
    pub const KERR_ARGUMENT: i32 = -6;
    pub const KERR_BAD_HANDLE: i32 = -8;
    pub const KERR_OVERFLOW: i32 = -9;
    pub const KERR_ALREADY_EXISTS: i32 = -11;
    pub const KERR_DIED: i32 = -13;
    pub const KERR_IN_USE: i32 = -14;
    pub const KERR_NOT_READY: i32 = -18;
    pub const KERR_PERMISSION_DENIED: i32 = -46;
    pub const KERR_ACCESS_DENIED: i32 = -21;
    pub const KERR_TIMED_OUT: i32 = -33;
}

/// Result alias used throughout the core
pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("out of memory or address space")]
    OutOfMemory,

    #[error("invalid handle {0:#x}")]
    InvalidHandle(u32),

    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    #[error("object {object} is a {found:?}, expected {expected:?}")]
    WrongObjectType {
        object: ObjectId,
        expected: ObjectKind,
        found: ObjectKind,
    },

    #[error("argument slot {0} out of range")]
    ArgSlotOutOfRange(u8),

    #[error("process {0} is already running")]
    AlreadyRunning(ObjectId),

    #[error("process {0} cannot run")]
    ProcessNotRunnable(ObjectId),

    #[error("process {0} already has a primary thread")]
    PrimaryThreadExists(ObjectId),

    #[error("mapping {start:#x}+{size:#x} overlaps an existing region")]
    MappingOverlap { start: u32, size: u32 },

    #[error("mapping {start:#x}+{size:#x} exceeds the address-space ceiling")]
    AddressCeiling { start: u32, size: u32 },

    #[error("{0:#x} is not page aligned")]
    Misaligned(u32),

    #[error("empty address range")]
    EmptyRange,

    #[error("range {start:#x}+{size:#x} is not fully mapped")]
    NotMapped { start: u32, size: u32 },

    #[error("thread {thread} cannot move from {from:?} to {to:?}")]
    InvalidThreadState {
        thread: ObjectId,
        from: ThreadState,
        to: ThreadState,
    },

    #[error("priority {0} out of range")]
    PriorityOutOfRange(u8),

    #[error("thread {thread} does not hold mutex {mutex}")]
    NotOwner { thread: ObjectId, mutex: ObjectId },

    #[error("counter overflow")]
    Overflow,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("access denied")]
    AccessDenied,

    #[error("no image registered for UID {0:#010x}")]
    UnknownUid(u32),
}

impl KernelError {
    /// EPOC error code surfaced to guest code
    pub fn guest_code(&self) -> i32 {
        use guest::*;
        match self {
            KernelError::OutOfMemory | KernelError::AddressCeiling { .. } => KERR_NO_MEMORY,
            KernelError::InvalidHandle(_) | KernelError::WrongObjectType { .. } => KERR_BAD_HANDLE,
            KernelError::ObjectNotFound(_)
            | KernelError::NotMapped { .. }
            | KernelError::UnknownUid(_) => KERR_NOT_FOUND,
            KernelError::ArgSlotOutOfRange(_)
            | KernelError::Misaligned(_)
            | KernelError::EmptyRange
            | KernelError::PriorityOutOfRange(_)
            | KernelError::InvalidArgument => KERR_ARGUMENT,
            KernelError::AlreadyRunning(_) => KERR_IN_USE,
            KernelError::ProcessNotRunnable(_) => KERR_DIED,
            KernelError::PrimaryThreadExists(_) | KernelError::MappingOverlap { .. } => {
                KERR_ALREADY_EXISTS
            }
            KernelError::InvalidThreadState { .. } => KERR_NOT_READY,
            KernelError::NotOwner { .. } | KernelError::AccessDenied => KERR_ACCESS_DENIED,
            KernelError::Overflow => KERR_OVERFLOW,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_guest_codes() {
        assert_eq!(KernelError::InvalidHandle(7).guest_code(), -8);
        assert_eq!(KernelError::OutOfMemory.guest_code(), -4);
        assert_eq!(KernelError::ArgSlotOutOfRange(16).guest_code(), -6);
        assert_eq!(KernelError::AlreadyRunning(ObjectId(1)).guest_code(), -14);
        assert_eq!(
            KernelError::NotOwner {
                thread: ObjectId(2),
                mutex: ObjectId(3)
            }
            .guest_code(),
            guest::KERR_ACCESS_DENIED
        );
    }

    #[test]
    fn test_error_display() {
        let err = KernelError::InvalidHandle(0x12);
        assert_eq!(err.to_string(), "invalid handle 0x12");

        let err = KernelError::WrongObjectType {
            object: ObjectId(4),
            expected: ObjectKind::Mutex,
            found: ObjectKind::Chunk,
        };
        assert_eq!(err.to_string(), "object #4 is a Chunk, expected Mutex");
    }
}
