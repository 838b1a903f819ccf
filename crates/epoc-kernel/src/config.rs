//! Kernel configuration
//!
//! Every field has a default, so `{}` is a valid configuration:
//!
//! ```json
//! {
//!   "address_ceiling": 2147483648,
//!   "stack_ceiling": 1879048192,
//!   "default_priority": 27,
//!   "max_chunk_size": 67108864,
//!   "quantum_budget": 10000,
//!   "check_invariants": true
//! }
//! ```

use epoc_kernel_core::{KernelLimits, MAX_PRIORITY, PAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::SystemResult;

/// Highest address ceiling; guest addresses must stay positive when returned
/// in r0
pub const MAX_ADDRESS_CEILING: u32 = 0x8000_0000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} {value:#x} is not page aligned")]
    Misaligned { field: &'static str, value: u32 },
    #[error("address ceiling {0:#x} exceeds 0x80000000")]
    CeilingTooHigh(u32),
    #[error("stack ceiling {stack:#x} lies above the address ceiling {address:#x}")]
    StackAboveCeiling { stack: u32, address: u32 },
    #[error("default priority {0} out of range")]
    Priority(u8),
    #[error("quantum budget must be non-zero")]
    ZeroBudget,
    #[error("chunk size limit must be non-zero")]
    ZeroChunkLimit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Exclusive upper bound of every address space
    pub address_ceiling: u32,
    /// Stacks are allocated top-down below this address
    pub stack_ceiling: u32,
    /// Priority for threads created without one
    pub default_priority: u8,
    /// Largest chunk or stack a guest may reserve
    pub max_chunk_size: u32,
    /// Instruction budget handed to the engine per quantum
    pub quantum_budget: u64,
    /// Audit the whole kernel state after every tick
    pub check_invariants: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        let limits = KernelLimits::default();
        Self {
            address_ceiling: limits.address_ceiling,
            stack_ceiling: limits.stack_ceiling,
            default_priority: limits.default_priority,
            max_chunk_size: limits.max_chunk_size,
            quantum_budget: 10_000,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

impl KernelConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> SystemResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("address_ceiling", self.address_ceiling),
            ("stack_ceiling", self.stack_ceiling),
            ("max_chunk_size", self.max_chunk_size),
        ] {
            if value % PAGE_SIZE != 0 {
                return Err(ConfigError::Misaligned { field, value });
            }
        }
        if self.address_ceiling > MAX_ADDRESS_CEILING {
            return Err(ConfigError::CeilingTooHigh(self.address_ceiling));
        }
        if self.stack_ceiling > self.address_ceiling {
            return Err(ConfigError::StackAboveCeiling {
                stack: self.stack_ceiling,
                address: self.address_ceiling,
            });
        }
        if self.default_priority > MAX_PRIORITY {
            return Err(ConfigError::Priority(self.default_priority));
        }
        if self.quantum_budget == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        if self.max_chunk_size == 0 {
            return Err(ConfigError::ZeroChunkLimit);
        }
        Ok(())
    }

    pub fn limits(&self) -> KernelLimits {
        KernelLimits {
            address_ceiling: self.address_ceiling,
            stack_ceiling: self.stack_ceiling,
            default_priority: self.default_priority,
            max_chunk_size: self.max_chunk_size,
        }
    }
}
