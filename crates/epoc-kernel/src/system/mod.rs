//! KernelSystem - the registry and execution loop around `KernelState`
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       KernelSystem                          │
//! │                                                             │
//! │   images (uid → ProcessImage)      engine: ExecutionEngine  │
//! │                │                            ▲               │
//! │                ▼                            │ run_quantum   │
//! │   ┌───────────────────────────────────────────────────┐     │
//! │   │        Arc<RwLock<KernelState>>  (write: loop)     │     │
//! │   └───────────────────────────────────────────────────┘     │
//! │                             │ read / suspend                │
//! └─────────────────────────────┼───────────────────────────────┘
//!                               ▼
//!                         DebugHandle (any host thread)
//! ```
//!
//! One host thread owns the system and calls `tick`; every mutation happens
//! under the write lock, so a `DebugHandle` never observes a half-finished
//! operation.

mod tick;

use std::collections::BTreeMap;
use std::sync::Arc;

use epoc_hal::ExecutionEngine;
use epoc_kernel_core::{
    ExitInfo, Handle, KernelError, KernelState, ObjectId, ObjectSpec, ProcessId, ProcessImage,
    ThreadId,
};
use log::info;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::KernelConfig;
use crate::debug::DebugHandle;
use crate::error::SystemResult;

pub use tick::{RunExit, TickOutcome};

/// The kernel: state, engine and installed images
pub struct KernelSystem<E: ExecutionEngine> {
    state: Arc<RwLock<KernelState>>,
    engine: E,
    config: KernelConfig,
    /// Installed images by UID
    images: BTreeMap<u32, ProcessImage>,
    ticks: u64,
}

impl<E: ExecutionEngine> KernelSystem<E> {
    /// Create a kernel with a validated configuration
    pub fn new(engine: E, config: KernelConfig) -> SystemResult<Self> {
        config.validate()?;
        info!(
            "kernel up: ceiling {:#x}, stacks below {:#x}",
            config.address_ceiling, config.stack_ceiling
        );
        Ok(Self {
            state: Arc::new(RwLock::new(KernelState::new(config.limits()))),
            engine,
            config,
            images: BTreeMap::new(),
            ticks: 0,
        })
    }

    pub fn with_defaults(engine: E) -> Self {
        let config = KernelConfig::default();
        Self {
            state: Arc::new(RwLock::new(KernelState::new(config.limits()))),
            engine,
            config,
            images: BTreeMap::new(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Ticks that ran a thread
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Handle for the debugger; cheap to clone and `Send + Sync`
    pub fn debug_handle(&self) -> DebugHandle {
        DebugHandle::new(Arc::clone(&self.state))
    }

    pub fn state(&self) -> RwLockReadGuard<'_, KernelState> {
        self.state.read()
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, KernelState> {
        self.state.write()
    }

    // ========================================================================
    // Images
    // ========================================================================

    /// Register an image under its UID, replacing any earlier install
    pub fn install_image(&mut self, image: ProcessImage) {
        let uid = image.uid_type.uid();
        info!("installed '{}' as uid {:#010x}", image.name, uid);
        self.images.insert(uid, image);
    }

    pub fn is_installed(&self, uid: u32) -> bool {
        self.images.contains_key(&uid)
    }

    /// Create and run a process from an installed image.
    ///
    /// The returned id carries the caller's reference.
    pub fn load(&mut self, uid: u32) -> SystemResult<ProcessId> {
        let image = self
            .images
            .get(&uid)
            .ok_or(KernelError::UnknownUid(uid))?;
        let mut state = self.state.write();
        let pid = state.create_process(image, "")?;
        if let Err(e) = state.run_process(pid) {
            state.release(pid)?;
            return Err(e.into());
        }
        Ok(pid)
    }

    /// Live processes built from `uid`
    pub fn processes_by_uid(&self, uid: u32) -> Vec<ProcessId> {
        self.state.read().processes_by_uid(uid)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    pub fn create_object(&self, spec: ObjectSpec) -> SystemResult<ObjectId> {
        Ok(self.state.write().create_object(spec)?)
    }

    pub fn create_process(&self, image: &ProcessImage, cmd_args: &str) -> SystemResult<ProcessId> {
        Ok(self.state.write().create_process(image, cmd_args)?)
    }

    pub fn run(&self, process: ProcessId) -> SystemResult<()> {
        Ok(self.state.write().run_process(process)?)
    }

    pub fn resolve(&self, process: ProcessId, handle: Handle) -> SystemResult<ObjectId> {
        Ok(self.state.read().resolve(process, handle)?)
    }

    pub fn release(&self, object: ObjectId) -> SystemResult<()> {
        Ok(self.state.write().release(object)?)
    }

    pub fn terminate_process(&self, process: ProcessId, reason: i32) -> SystemResult<()> {
        Ok(self
            .state
            .write()
            .terminate_process(process, ExitInfo::kill(reason))?)
    }

    pub fn terminate_thread(&self, thread: ThreadId, reason: i32) -> SystemResult<()> {
        Ok(self
            .state
            .write()
            .terminate_thread(thread, ExitInfo::kill(reason))?)
    }
}
