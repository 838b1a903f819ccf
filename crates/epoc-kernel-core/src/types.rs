//! Core kernel types
//!
//! Identifiers, handle values, guest addresses, UID triples and the saved
//! register file. All types here are pure data.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Size of one guest page in bytes
pub const PAGE_SIZE: u32 = 0x1000;

/// Number of argument slots carried by every process
pub const ARG_SLOT_COUNT: usize = 16;

/// Number of scheduler priority levels
pub const NUM_PRIORITIES: usize = 64;

/// Highest (most urgent) priority level
pub const MAX_PRIORITY: u8 = (NUM_PRIORITIES - 1) as u8;

/// Global kernel object identifier, never reused
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Object id of a process
pub type ProcessId = ObjectId;

/// Object id of a thread
pub type ThreadId = ObjectId;

/// Type discriminant of a kernel object
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Process,
    Thread,
    Semaphore,
    Mutex,
    Chunk,
}

/// Process-local handle value.
///
/// Value 0 is never valid. The top of the range is reserved for the
/// pseudo-handles that name the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// Names the calling process without a table entry
    pub const CURRENT_PROCESS: Handle = Handle(0xFFFF_8000);
    /// Names the calling thread without a table entry
    pub const CURRENT_THREAD: Handle = Handle(0xFFFF_8001);
    /// First value that is never handed out by a handle table
    pub const PSEUDO_BASE: u32 = 0xFFFF_8000;

    /// True for the reserved pseudo-handle range
    pub fn is_pseudo(self) -> bool {
        self.0 >= Self::PSEUDO_BASE
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 32-bit guest virtual address
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    pub fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// Round down to the containing page
    pub fn page_base(self) -> VirtAddr {
        VirtAddr(self.0 & !(PAGE_SIZE - 1))
    }

    /// Address `offset` bytes further on, or `None` on wrap-around
    pub fn checked_add(self, offset: u32) -> Option<VirtAddr> {
        self.0.checked_add(offset).map(VirtAddr)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Round a byte count up to whole pages, `None` if that overflows
pub fn page_round_up(size: u32) -> Option<u32> {
    size.checked_add(PAGE_SIZE - 1).map(|s| s & !(PAGE_SIZE - 1))
}

/// UID triple identifying the binary a process was built from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UidType(pub u32, pub u32, pub u32);

impl UidType {
    /// The application UID (third UID of the triple)
    pub fn uid(&self) -> u32 {
        self.2
    }
}

/// Saved guest register file (ARM: r0-r15 plus CPSR).
///
/// Opaque to the kernel apart from the entry PC, the initial stack pointer
/// and the return register used for kernel-call results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContext {
    pub regs: [u32; 16],
    pub cpsr: u32,
}

impl ThreadContext {
    pub const SP: usize = 13;
    pub const LR: usize = 14;
    pub const PC: usize = 15;

    /// Fresh context starting at `entry` with the given stack top
    pub fn new(entry: VirtAddr, stack_top: VirtAddr) -> Self {
        let mut ctx = Self::default();
        ctx.regs[Self::PC] = entry.0;
        ctx.regs[Self::SP] = stack_top.0;
        // User mode
        ctx.cpsr = 0x10;
        ctx
    }

    pub fn pc(&self) -> VirtAddr {
        VirtAddr(self.regs[Self::PC])
    }

    pub fn set_pc(&mut self, addr: VirtAddr) {
        self.regs[Self::PC] = addr.0;
    }

    pub fn sp(&self) -> VirtAddr {
        VirtAddr(self.regs[Self::SP])
    }

    /// Argument register `n` (r0-r3)
    pub fn arg(&self, n: usize) -> u32 {
        self.regs[n & 3]
    }

    /// Store a kernel-call result in r0
    pub fn set_return(&mut self, value: i32) {
        self.regs[0] = value as u32;
    }

    pub fn return_value(&self) -> i32 {
        self.regs[0] as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pseudo_handles() {
        assert!(Handle::CURRENT_PROCESS.is_pseudo());
        assert!(Handle::CURRENT_THREAD.is_pseudo());
        assert!(!Handle(1).is_pseudo());
        assert!(!Handle(0x7FFF_FFFF).is_pseudo());
    }

    #[test]
    fn test_page_round_up() {
        assert_eq!(page_round_up(0), Some(0));
        assert_eq!(page_round_up(1), Some(PAGE_SIZE));
        assert_eq!(page_round_up(4096), Some(4096));
        assert_eq!(page_round_up(4097), Some(8192));
        assert_eq!(page_round_up(u32::MAX), None);
    }

    #[test]
    fn test_context_new() {
        let ctx = ThreadContext::new(VirtAddr(0x8000), VirtAddr(0x7000_0000));
        assert_eq!(ctx.pc(), VirtAddr(0x8000));
        assert_eq!(ctx.sp(), VirtAddr(0x7000_0000));
        assert_eq!(ctx.return_value(), 0);
    }

    #[test]
    fn test_context_return_value_negative() {
        let mut ctx = ThreadContext::default();
        ctx.set_return(-33);
        assert_eq!(ctx.regs[0], 0xFFFF_FFDF);
        assert_eq!(ctx.return_value(), -33);
    }

    #[test]
    fn test_uid_type() {
        let uids = UidType(0x1000_007A, 0x100039CE, 0x1020_4060);
        assert_eq!(uids.uid(), 0x1020_4060);
    }
}
