//! Register access error types

use thiserror::Error;

use crate::types::AddressSpace;

/// Result type for register operations
pub type RegResult<T> = Result<T, RegError>;

/// Errors that can occur during register operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegError {
    /// Raw register write returned a non-positive status
    #[error("register writing failed, status={status} (register {register})")]
    RawWrite { register: u32, status: i32 },

    /// Raw register read returned a non-positive status
    #[error("register reading failed, status={status} (register {register})")]
    RawRead { register: u32, status: i32 },

    /// Rejected before any I/O was attempted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Refresh range outside the register slice
    #[error("Register index range {start}..={end} out of bounds for {len} registers")]
    IndexOutOfRange {
        start: usize,
        end: usize,
        len: usize,
    },

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// No device session is configured for the requested address space
    #[error("No session configured for address space {0}")]
    NoSession(AddressSpace),

    /// Driver was used after `close()`
    #[error("Device handle is closed")]
    DeviceClosed,

    /// Vendor library could not be loaded
    #[error("Vendor library not found: {0}")]
    LibraryNotFound(String),

    /// Vendor library is missing a required export
    #[error("Vendor library symbol missing: {0}")]
    SymbolMissing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared driver lock was poisoned by a panicking holder
    #[error("Driver lock poisoned")]
    LockPoisoned,
}

impl RegError {
    /// Check if this error came from the raw register primitive
    pub fn is_hardware_failure(&self) -> bool {
        matches!(self, RegError::RawWrite { .. } | RegError::RawRead { .. })
    }

    /// Check if this is an unsupported-operation signal
    pub fn is_not_supported(&self) -> bool {
        matches!(self, RegError::NotSupported(_))
    }

    /// Raw status code carried by a hardware failure
    pub fn status(&self) -> Option<i32> {
        match self {
            RegError::RawWrite { status, .. } | RegError::RawRead { status, .. } => Some(*status),
            _ => None,
        }
    }
}
