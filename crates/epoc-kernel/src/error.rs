//! Runtime errors

use epoc_hal::HalError;
use epoc_kernel_core::KernelError;

use crate::config::ConfigError;

pub type SystemResult<T> = Result<T, SystemError>;

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("execution engine: {0}")]
    Hal(#[from] HalError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("snapshot encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SystemError {
    /// The kernel error behind this failure, if there is one
    pub fn kernel_error(&self) -> Option<KernelError> {
        match self {
            SystemError::Kernel(e) => Some(*e),
            _ => None,
        }
    }
}
