//! Crate-wide error type.
//!
//! Every fallible operation in this crate returns [`Result`]. Driver ioctl
//! failures are translated in one place ([`Error::from_last_win32`]) so that
//! the buffer-growth and argument-validation paths can match on structured
//! kinds instead of raw Win32 codes.

use thiserror::Error;
use windows::Win32::Foundation::{
    GetLastError, ERROR_BUFFER_OVERFLOW, ERROR_INSUFFICIENT_BUFFER, ERROR_INVALID_PARAMETER,
};

/// Errors surfaced by the driver transport, the static filter table and the
/// filter engines.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The `\\.\NDISRD` device could not be opened.
    #[error("packet filter driver is not available")]
    DriverUnavailable,

    /// A device control operation failed; carries the Win32 error code.
    #[error("device i/o control failed with win32 error {0:#010x}")]
    Io(u32),

    /// The caller-supplied output buffer is too small; grow and retry.
    #[error("output buffer too small")]
    BufferTooSmall,

    /// Caller-side validation failed before reaching the driver.
    #[error("invalid argument")]
    InvalidArgument,

    /// The operation requires prior initialization.
    #[error("driver interface is not initialized")]
    NotInitialized,

    /// The engine is not in the `Running` state.
    #[error("packet filter is not running")]
    NotRunning,

    /// The engine is not in the `Stopped` state.
    #[error("packet filter is not stopped")]
    NotStopped,

    /// An adapter index fell outside the enumerated adapter list.
    #[error("adapter index {0} is out of range")]
    AdapterOutOfRange(usize),
}

impl Error {
    /// Translates the calling thread's last Win32 error into a structured
    /// kind. Must be called immediately after a failed Win32 API call.
    pub(crate) fn from_last_win32() -> Self {
        let code = unsafe { GetLastError() };
        if code == ERROR_INSUFFICIENT_BUFFER || code == ERROR_BUFFER_OVERFLOW {
            Error::BufferTooSmall
        } else if code == ERROR_INVALID_PARAMETER {
            Error::InvalidArgument
        } else {
            Error::Io(code.0)
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
