//! EPOC kernel runtime
//!
//! Wraps the pure `epoc-kernel-core` state machine with what it needs to run
//! guest code:
//!
//! - `KernelSystem`: object registry front-end, installed images, and the
//!   tick loop that hands threads to an `ExecutionEngine`
//! - `KernelConfig`: JSON configuration with per-field defaults
//! - `DebugHandle`: snapshots, memory reads and suspend/resume from another
//!   host thread
//!
//! State lives behind `Arc<parking_lot::RwLock<KernelState>>`. The execution
//! loop holds the write half for a whole tick; the debugger reads between
//! ticks.

pub mod config;
pub mod debug;
pub mod error;
pub mod memory;
pub mod system;

pub use config::{ConfigError, KernelConfig};
pub use debug::DebugHandle;
pub use error::{SystemError, SystemResult};
pub use memory::ProcessMemory;
pub use system::{KernelSystem, RunExit, TickOutcome};

// Re-export the core so embedders need a single dependency
pub use epoc_kernel_core as core;
