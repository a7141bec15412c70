//! Job DTOs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request to create a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub name: Option<String>,
    pub image: String,
    pub command: String,
    pub cpu: u32,
    pub memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("image reference cannot be empty")]
    EmptyImage,
    #[error("command cannot be empty")]
    EmptyCommand,
    #[error("cpu must be at least 1 core")]
    ZeroCpu,
    #[error("memory limit must be greater than 0 bytes")]
    ZeroMemory,
    #[error("memory limit of {0} bytes exceeds the largest storable value")]
    MemoryTooLarge(u64),
}

/// Largest memory limit a job record can hold
pub const MAX_MEMORY: u64 = i64::MAX as u64;

impl CreateJob {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage);
        }
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        if self.cpu == 0 {
            return Err(ValidationError::ZeroCpu);
        }
        if self.memory == 0 {
            return Err(ValidationError::ZeroMemory);
        }
        if self.memory > MAX_MEMORY {
            return Err(ValidationError::MemoryTooLarge(self.memory));
        }
        Ok(())
    }
}
