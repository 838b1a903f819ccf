//! Per-process page table and memory chunks
//!
//! A `PageTable` maps page-aligned virtual ranges to regions. Every region is
//! backed by a `Chunk` kernel object; the region records which chunk and at
//! what offset. Private regions own an anonymous chunk, shared chunks are
//! mapped into several tables with one reference per mapping.
//!
//! `lookup` is the hot path: it distinguishes an unmapped access from a
//! protection violation so the right exception reaches guest code.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::types::{ObjectId, VirtAddr, PAGE_SIZE};

bitflags! {
    /// Region protection attributes
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Protection: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

/// Kind of memory access being translated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    fn required(self) -> Protection {
        match self {
            Access::Read => Protection::READ,
            Access::Write => Protection::WRITE,
            Access::Execute => Protection::EXECUTE,
        }
    }
}

/// Why a translation failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// No region covers the address
    Unmapped,
    /// A region covers the address but forbids the access
    Protection,
    /// Inside a reserved region but past its committed memory
    Uncommitted,
}

/// A failed translation, reported back to the execution engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFault {
    pub addr: VirtAddr,
    pub access: Access,
    pub kind: FaultKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    Code,
    StaticData,
    Stack,
    Heap,
    SharedChunk,
}

impl RegionKind {
    /// Regions whose committed size may grow on demand
    pub fn is_growable(self) -> bool {
        matches!(self, RegionKind::Heap | RegionKind::SharedChunk)
    }
}

/// One mapped range of a page table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub start: VirtAddr,
    pub size: u32,
    pub kind: RegionKind,
    pub protection: Protection,
    /// Backing chunk object
    pub chunk: ObjectId,
    /// Offset of `start` within the chunk
    pub chunk_offset: u32,
}

impl Region {
    /// Exclusive end address, widened so the top page never wraps
    pub fn end(&self) -> u64 {
        self.start.0 as u64 + self.size as u64
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr.0 >= self.start.0 && (addr.0 as u64) < self.end()
    }

    /// Sub-range `[from, to)` of this region, keeping the chunk offset aligned
    fn slice(&self, from: u64, to: u64) -> Region {
        Region {
            start: VirtAddr(from as u32),
            size: (to - from) as u32,
            kind: self.kind,
            protection: self.protection,
            chunk: self.chunk,
            chunk_offset: self.chunk_offset + (from - self.start.0 as u64) as u32,
        }
    }
}

/// Result of an unmap: the original regions taken out and the pieces of them
/// that stayed mapped. Each piece holds its own chunk reference.
#[derive(Debug, Default)]
pub struct Unmapped {
    pub removed: Vec<Region>,
    pub remainders: Vec<Region>,
}

/// Per-process virtual-to-chunk mapping.
///
/// Regions are keyed by start address and never overlap.
#[derive(Clone, Debug)]
pub struct PageTable {
    regions: BTreeMap<u32, Region>,
    ceiling: u32,
}

impl PageTable {
    pub fn new(ceiling: u32) -> Self {
        Self {
            regions: BTreeMap::new(),
            ceiling,
        }
    }

    /// Exclusive upper bound for mappings
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Install a region.
    ///
    /// Fails on empty or misaligned ranges, ranges past the ceiling and any
    /// overlap with a live region.
    pub fn map(&mut self, region: Region) -> KernelResult<()> {
        check_range(region.start, region.size)?;
        let end = region.end();
        if end > self.ceiling as u64 {
            return Err(KernelError::AddressCeiling {
                start: region.start.0,
                size: region.size,
            });
        }
        if self.overlaps(region.start.0 as u64, end) {
            return Err(KernelError::MappingOverlap {
                start: region.start.0,
                size: region.size,
            });
        }
        self.regions.insert(region.start.0, region);
        Ok(())
    }

    /// True if any region intersects `[start, end)`
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        // Only the last region starting below `end` can reach into the range.
        let candidate = if end > u32::MAX as u64 {
            self.regions.values().next_back()
        } else {
            self.regions.range(..end as u32).next_back().map(|(_, r)| r)
        };
        candidate.is_some_and(|r| r.end() > start)
    }

    /// Remove `[start, start + size)`.
    ///
    /// The range must be covered by contiguous regions, otherwise nothing
    /// changes and `NotMapped` is returned. Regions that only partly overlap
    /// the range are split and their outer pieces stay mapped.
    pub fn unmap(&mut self, start: VirtAddr, size: u32) -> KernelResult<Unmapped> {
        let keys: Vec<u32> = self
            .covering(start, size)?
            .iter()
            .map(|r| r.start.0)
            .collect();
        let from = start.0 as u64;
        let to = from + size as u64;

        let mut result = Unmapped::default();
        for key in keys {
            let Some(region) = self.regions.remove(&key) else {
                continue;
            };
            if (region.start.0 as u64) < from {
                result.remainders.push(region.slice(region.start.0 as u64, from));
            }
            if region.end() > to {
                result.remainders.push(region.slice(to, region.end()));
            }
            result.removed.push(region);
        }
        for piece in &result.remainders {
            self.regions.insert(piece.start.0, piece.clone());
        }
        Ok(result)
    }

    /// Regions covering `[start, start + size)` in address order.
    ///
    /// A gap anywhere in the range reports `NotMapped`.
    pub fn covering(&self, start: VirtAddr, size: u32) -> KernelResult<Vec<&Region>> {
        check_range(start, size)?;
        let to = start.0 as u64 + size as u64;

        let mut cursor = start.0 as u64;
        let mut regions = Vec::new();
        while cursor < to {
            let region = u32::try_from(cursor)
                .ok()
                .and_then(|at| self.region_at(VirtAddr(at)))
                .ok_or(KernelError::NotMapped {
                    start: start.0,
                    size,
                })?;
            cursor = region.end();
            regions.push(region);
        }
        Ok(regions)
    }

    /// Region covering `addr`, if any
    pub fn region_at(&self, addr: VirtAddr) -> Option<&Region> {
        self.regions
            .range(..=addr.0)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
    }

    /// Translate one access.
    ///
    /// Returns the covering region, or a fault that tells an unmapped address
    /// apart from a protection violation. Committed-memory checks happen in
    /// `KernelState::translate`, which can see the chunk.
    pub fn lookup(&self, addr: VirtAddr, access: Access) -> Result<&Region, PageFault> {
        let region = self.region_at(addr).ok_or(PageFault {
            addr,
            access,
            kind: FaultKind::Unmapped,
        })?;
        if !region.protection.contains(access.required()) {
            return Err(PageFault {
                addr,
                access,
                kind: FaultKind::Protection,
            });
        }
        Ok(region)
    }

    /// Highest page-aligned base in `[floor, ceiling)` with `size` free bytes
    /// above it. Used to place stacks top-down.
    pub fn find_free(&self, size: u32, floor: u32, ceiling: u32) -> Option<VirtAddr> {
        let size = size as u64;
        let floor = floor as u64;
        let mut top = (ceiling.min(self.ceiling) as u64) & !(PAGE_SIZE as u64 - 1);

        for region in self.regions.values().rev() {
            if region.start.0 as u64 >= top {
                continue;
            }
            let gap_base = region.end();
            if gap_base <= top && top - gap_base >= size {
                break;
            }
            top = region.start.0 as u64;
        }

        if top >= floor + size {
            Some(VirtAddr((top - size) as u32))
        } else {
            None
        }
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Remove every region (address-space teardown)
    pub fn drain(&mut self) -> Vec<Region> {
        core::mem::take(&mut self.regions).into_values().collect()
    }
}

fn check_range(start: VirtAddr, size: u32) -> KernelResult<()> {
    if size == 0 {
        return Err(KernelError::EmptyRange);
    }
    if !start.is_page_aligned() {
        return Err(KernelError::Misaligned(start.0));
    }
    if size % PAGE_SIZE != 0 {
        return Err(KernelError::Misaligned(size));
    }
    Ok(())
}

// ============================================================================
// Chunks
// ============================================================================

/// Host-backed memory block.
///
/// `max_size` bytes are reserved; the committed prefix is what actually
/// holds data.
#[derive(Clone, Debug)]
pub struct Chunk {
    committed: Vec<u8>,
    max_size: u32,
    /// Shared chunks may be mapped into several page tables
    pub shared: bool,
}

impl Chunk {
    pub fn new(max_size: u32, committed: u32, shared: bool) -> KernelResult<Self> {
        if committed > max_size {
            return Err(KernelError::OutOfMemory);
        }
        let mut chunk = Self {
            committed: Vec::new(),
            max_size,
            shared,
        };
        chunk.adjust(committed)?;
        Ok(chunk)
    }

    /// Chunk pre-filled with `data`, committed to `committed` bytes
    pub fn with_data(data: &[u8], committed: u32, max_size: u32) -> KernelResult<Self> {
        let mut chunk = Self::new(max_size, committed.max(data.len() as u32), false)?;
        chunk.committed[..data.len()].copy_from_slice(data);
        Ok(chunk)
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn committed(&self) -> u32 {
        self.committed.len() as u32
    }

    /// Grow or shrink the committed prefix. Grown memory reads as zero.
    pub fn adjust(&mut self, size: u32) -> KernelResult<()> {
        if size > self.max_size {
            return Err(KernelError::OutOfMemory);
        }
        let size = size as usize;
        if let Some(extra) = size.checked_sub(self.committed.len()) {
            self.committed
                .try_reserve_exact(extra)
                .map_err(|_| KernelError::OutOfMemory)?;
        }
        self.committed.resize(size, 0);
        Ok(())
    }

    pub fn bytes(&self, offset: u32, len: u32) -> Option<&[u8]> {
        let end = offset.checked_add(len)? as usize;
        self.committed.get(offset as usize..end)
    }

    pub fn bytes_mut(&mut self, offset: u32, len: u32) -> Option<&mut [u8]> {
        let end = offset.checked_add(len)? as usize;
        self.committed.get_mut(offset as usize..end)
    }
}

/// Where a translated guest address lives on the host side
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLocation {
    pub chunk: ObjectId,
    pub offset: u32,
}
