//! Address-space operations that need both a page table and its chunks

use alloc::format;

use log::debug;

use super::KernelState;
use crate::error::{KernelError, KernelResult};
use crate::memory::{Access, Chunk, FaultKind, HostLocation, PageFault, Protection, Region, RegionKind};
use crate::object::ObjectBody;
use crate::types::{page_round_up, ObjectId, ProcessId, VirtAddr, PAGE_SIZE};

impl KernelState {
    /// Map `chunk` as a new private region of `pid`.
    ///
    /// The chunk becomes a kernel object referenced only by the mapping.
    pub fn map_private(
        &mut self,
        pid: ProcessId,
        start: VirtAddr,
        size: u32,
        kind: RegionKind,
        protection: Protection,
        chunk: Chunk,
    ) -> KernelResult<ObjectId> {
        let name = format!("{}:{:?}@{}", pid, kind, start);
        let chunk_id = self.objects.insert(name, ObjectBody::Chunk(chunk));
        let region = Region {
            start,
            size,
            kind,
            protection,
            chunk: chunk_id,
            chunk_offset: 0,
        };
        if let Err(e) = self
            .objects
            .process_mut(pid)
            .and_then(|p| p.page_table.map(region))
        {
            self.release(chunk_id)?;
            return Err(e);
        }
        Ok(chunk_id)
    }

    /// Map a shared chunk into `pid`, at `at` or wherever there is room.
    ///
    /// Each mapping holds one reference on the chunk.
    pub fn map_chunk(
        &mut self,
        pid: ProcessId,
        chunk: ObjectId,
        at: Option<VirtAddr>,
        protection: Protection,
    ) -> KernelResult<VirtAddr> {
        let c = self.objects.chunk(chunk)?;
        if !c.shared {
            return Err(KernelError::AccessDenied);
        }
        let size = c.max_size();
        let start = match at {
            Some(addr) => addr,
            None => self
                .objects
                .process(pid)?
                .page_table
                .find_free(size, PAGE_SIZE, self.limits.address_ceiling)
                .ok_or(KernelError::OutOfMemory)?,
        };

        self.retain(chunk)?;
        let region = Region {
            start,
            size,
            kind: RegionKind::SharedChunk,
            protection,
            chunk,
            chunk_offset: 0,
        };
        if let Err(e) = self
            .objects
            .process_mut(pid)
            .and_then(|p| p.page_table.map(region))
        {
            self.release(chunk)?;
            return Err(e);
        }
        debug!("mapped chunk {} into {} at {}", chunk, pid, start);
        Ok(start)
    }

    /// Unmap a range, adjusting chunk references for removed and split regions
    pub fn unmap(&mut self, pid: ProcessId, start: VirtAddr, size: u32) -> KernelResult<()> {
        let out = self.objects.process_mut(pid)?.page_table.unmap(start, size)?;
        for piece in &out.remainders {
            self.retain(piece.chunk)?;
        }
        for region in &out.removed {
            self.release(region.chunk)?;
        }
        Ok(())
    }

    /// Grow or shrink a chunk's committed memory (page granular)
    pub fn adjust_chunk(&mut self, chunk: ObjectId, size: u32) -> KernelResult<()> {
        let size = page_round_up(size).ok_or(KernelError::OutOfMemory)?;
        self.objects.chunk_mut(chunk)?.adjust(size)
    }

    // ========================================================================
    // Translation
    // ========================================================================

    /// Translate one guest address of `pid` to its backing chunk.
    ///
    /// Faults instead of failing: `Unmapped` (including for a process that no
    /// longer exists), `Protection`, or `Uncommitted` for reserved memory that
    /// has no backing yet.
    pub fn translate(
        &self,
        pid: ProcessId,
        addr: VirtAddr,
        access: Access,
    ) -> Result<HostLocation, PageFault> {
        self.translate_span(pid, addr, access).map(|(loc, _)| loc)
    }

    /// Translation plus the number of contiguous bytes available from there
    fn translate_span(
        &self,
        pid: ProcessId,
        addr: VirtAddr,
        access: Access,
    ) -> Result<(HostLocation, u32), PageFault> {
        let fault = |kind| PageFault { addr, access, kind };
        let process = self
            .objects
            .process(pid)
            .map_err(|_| fault(FaultKind::Unmapped))?;
        let region = process.page_table.lookup(addr, access)?;
        let offset = region.chunk_offset + (addr.0 - region.start.0);
        let region_left = (region.end() - addr.0 as u64) as u32;

        let chunk = self
            .objects
            .chunk(region.chunk)
            .map_err(|_| fault(FaultKind::Unmapped))?;
        if offset >= chunk.committed() {
            return Err(fault(FaultKind::Uncommitted));
        }
        let avail = region_left.min(chunk.committed() - offset);
        Ok((
            HostLocation {
                chunk: region.chunk,
                offset,
            },
            avail,
        ))
    }

    /// Copy guest memory out, checking `access` on every page touched
    pub fn read_memory(
        &self,
        pid: ProcessId,
        addr: VirtAddr,
        buf: &mut [u8],
        access: Access,
    ) -> Result<(), PageFault> {
        let mut done = 0usize;
        while done < buf.len() {
            let at = VirtAddr(addr.0.wrapping_add(done as u32));
            let (loc, avail) = self.translate_span(pid, at, access)?;
            let n = (avail as usize).min(buf.len() - done);
            let bytes = self
                .objects
                .chunk(loc.chunk)
                .ok()
                .and_then(|c| c.bytes(loc.offset, n as u32))
                .ok_or(PageFault {
                    addr: at,
                    access,
                    kind: FaultKind::Unmapped,
                })?;
            buf[done..done + n].copy_from_slice(bytes);
            done += n;
        }
        Ok(())
    }

    /// Copy into guest memory; every page touched must be writable
    pub fn write_memory(
        &mut self,
        pid: ProcessId,
        addr: VirtAddr,
        data: &[u8],
    ) -> Result<(), PageFault> {
        let mut done = 0usize;
        while done < data.len() {
            let at = VirtAddr(addr.0.wrapping_add(done as u32));
            let (loc, avail) = self.translate_span(pid, at, Access::Write)?;
            let n = (avail as usize).min(data.len() - done);
            let bytes = self
                .objects
                .chunk_mut(loc.chunk)
                .ok()
                .and_then(|c| c.bytes_mut(loc.offset, n as u32))
                .ok_or(PageFault {
                    addr: at,
                    access: Access::Write,
                    kind: FaultKind::Unmapped,
                })?;
            bytes.copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Demand paging: commit heap or chunk memory up to the faulting page.
    ///
    /// Returns false when the fault is not one that committing can fix.
    pub fn commit_for_fault(&mut self, pid: ProcessId, fault: &PageFault) -> KernelResult<bool> {
        if fault.kind != FaultKind::Uncommitted {
            return Ok(false);
        }
        let Some(region) = self
            .objects
            .process(pid)?
            .page_table
            .region_at(fault.addr)
            .cloned()
        else {
            return Ok(false);
        };
        if !region.kind.is_growable() {
            return Ok(false);
        }

        let offset = region.chunk_offset + (fault.addr.0 - region.start.0);
        let target = page_round_up(offset + 1).ok_or(KernelError::OutOfMemory)?;
        let chunk = self.objects.chunk_mut(region.chunk)?;
        let size = target.max(chunk.committed());
        chunk.adjust(size)?;
        debug!(
            "committed {} up to {:#x} for fault at {}",
            region.chunk, size, fault.addr
        );
        Ok(true)
    }
}
