//! Unified error types for vadev

use thiserror::Error;

/// Main error type for vadev operations
#[derive(Error, Debug)]
pub enum VadevError {
    /// Caller supplied a null/zero-sized or otherwise unusable argument
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A second buffer allocation was attempted on the same stream
    #[error("audio buffer already allocated for this stream")]
    AlreadyAllocated,

    /// Dedicated allocation and the loopback fallback both failed,
    /// or a mapping could not be established
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Operation attempted before the required setup step
    #[error("device not ready: {0}")]
    DeviceNotReady(&'static str),

    /// Destination buffer smaller than required; retry with `required` bytes
    #[error("buffer too small: {required} bytes required")]
    BufferTooSmall { required: usize },
}

/// Result type alias for vadev operations
pub type Result<T> = std::result::Result<T, VadevError>;

impl VadevError {
    /// Check if this error is recoverable (caller can retry after freeing resources)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VadevError::ResourceExhausted(_) | VadevError::BufferTooSmall { .. }
        )
    }
}
