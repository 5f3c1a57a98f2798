//! Error types for the Skirmish render layer
//!
//! This module defines the error types used throughout the layer. Errors fall
//! into three families:
//! - caller defects (double lock, out-of-range write, draw without vertex
//!   buffer, write-lock while pipeline-bound): never retried
//! - resource exhaustion (`OutOfMemory`): retried once by the buffer pool
//! - environmental failure (`DeviceLost`): recoverable by rebuilding the layer

use std::fmt;

/// Result type for render layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Render layer errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backend-specific error
    BackendError(String),

    /// Backing storage could not be allocated
    OutOfMemory,

    /// Invalid resource (unknown handle, bad descriptor, bad reference count)
    InvalidResource(String),

    /// Initialization failed (device, configuration)
    InitializationFailed(String),

    /// Write lock requested on a resource that is currently bound into the pipeline
    ResourceInUse(String),

    /// A second lock scope was requested before the first one was released
    ConcurrentLock(String),

    /// Write outside the range granted by a lock scope
    RangeViolation {
        /// First byte of the rejected write, relative to the scope start
        offset: usize,
        /// Length of the rejected write in bytes
        len: usize,
        /// Size of the granted range in bytes
        limit: usize,
    },

    /// Lock mode not valid for the requested range (Discard away from offset zero)
    InvalidLockMode(String),

    /// Draw issued with no vertex buffer bound on stream 0
    MissingVertexBuffer,

    /// The backend reported a lost or invalidated device
    DeviceLost,
}

impl Error {
    /// Whether the error indicates a logic bug in the calling code
    pub fn is_caller_defect(&self) -> bool {
        matches!(
            self,
            Error::ResourceInUse(_)
                | Error::ConcurrentLock(_)
                | Error::RangeViolation { .. }
                | Error::InvalidLockMode(_)
                | Error::MissingVertexBuffer
        )
    }

    /// Whether the error is the recoverable device-lost status
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Error::DeviceLost)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::ResourceInUse(msg) => write!(f, "Resource in use: {}", msg),
            Error::ConcurrentLock(msg) => write!(f, "Concurrent lock: {}", msg),
            Error::RangeViolation { offset, len, limit } => write!(
                f,
                "Range violation: write of {} bytes at offset {} exceeds locked range of {} bytes",
                len, offset, limit
            ),
            Error::InvalidLockMode(msg) => write!(f, "Invalid lock mode: {}", msg),
            Error::MissingVertexBuffer => write!(f, "Draw issued with no vertex buffer bound"),
            Error::DeviceLost => write!(f, "Graphics device lost"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
