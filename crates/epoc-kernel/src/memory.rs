//! Guest memory view handed to the execution engine

use epoc_hal::GuestMemory;
use epoc_kernel_core::{Access, HostLocation, KernelState, PageFault, ProcessId, VirtAddr};

/// One process's address space, borrowed for the length of a quantum
pub struct ProcessMemory<'a> {
    state: &'a mut KernelState,
    process: ProcessId,
}

impl<'a> ProcessMemory<'a> {
    pub fn new(state: &'a mut KernelState, process: ProcessId) -> Self {
        Self { state, process }
    }
}

impl GuestMemory for ProcessMemory<'_> {
    fn read(&self, addr: VirtAddr, buf: &mut [u8], access: Access) -> Result<(), PageFault> {
        self.state.read_memory(self.process, addr, buf, access)
    }

    fn write(&mut self, addr: VirtAddr, data: &[u8]) -> Result<(), PageFault> {
        self.state.write_memory(self.process, addr, data)
    }

    fn translate(&self, addr: VirtAddr, access: Access) -> Result<HostLocation, PageFault> {
        self.state.translate(self.process, addr, access)
    }
}
