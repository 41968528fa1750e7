//! Thin wrapper over a Win32 event object.
//!
//! Packet-arrival and adapter-list-change notifications are both delivered
//! through plain Win32 events. [`SafeEvent`] owns the handle for its whole
//! lifetime and closes it on drop, so an event registered with the driver can
//! never outlive the user-mode object waiting on it.

use windows::{
    core::PCWSTR,
    Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED},
    Win32::System::Threading::{CreateEventW, ResetEvent, SetEvent, WaitForSingleObject},
};

use crate::{Error, Result};

/// An owned Win32 event.
///
/// Events used for packet notification are manual-reset: the driver signals,
/// the consumer wakes, drains everything queued and resets the event itself.
#[derive(Debug)]
pub struct SafeEvent(HANDLE);

impl SafeEvent {
    /// Creates a new event object.
    ///
    /// `manual_reset` selects the reset discipline, `signaled` the initial
    /// state.
    pub fn new(manual_reset: bool, signaled: bool) -> Result<Self> {
        match unsafe { CreateEventW(None, manual_reset, signaled, PCWSTR::null()) } {
            Ok(handle) => Ok(Self(handle)),
            Err(_) => Err(Error::from_last_win32()),
        }
    }

    /// The raw handle, e.g. for registration with the driver.
    pub fn handle(&self) -> HANDLE {
        self.0
    }

    /// Blocks until the event is signaled or `timeout_ms` elapses
    /// (`u32::MAX` waits forever). Returns the raw wait status.
    pub fn wait(&self, timeout_ms: u32) -> Result<u32> {
        let status = unsafe { WaitForSingleObject(self.0, timeout_ms) };
        if status == WAIT_FAILED {
            Err(Error::from_last_win32())
        } else {
            Ok(status.0)
        }
    }

    /// Sets the event to the signaled state.
    pub fn signal(&self) -> Result<()> {
        unsafe { SetEvent(self.0) }
            .ok()
            .map_err(|_| Error::from_last_win32())
    }

    /// Returns the event to the non-signaled state.
    pub fn reset(&self) -> Result<()> {
        unsafe { ResetEvent(self.0) }
            .ok()
            .map_err(|_| Error::from_last_win32())
    }
}

impl Drop for SafeEvent {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}

// The handle is only ever passed to thread-safe Win32 calls.
unsafe impl Send for SafeEvent {}
unsafe impl Sync for SafeEvent {}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Foundation::{WAIT_OBJECT_0, WAIT_TIMEOUT};

    #[test]
    fn signal_wakes_waiter() {
        let event = SafeEvent::new(true, false).unwrap();
        event.signal().unwrap();
        assert_eq!(event.wait(0).unwrap(), WAIT_OBJECT_0.0);
    }

    #[test]
    fn reset_clears_signal() {
        let event = SafeEvent::new(true, true).unwrap();
        event.reset().unwrap();
        assert_eq!(event.wait(0).unwrap(), WAIT_TIMEOUT.0);
    }

    #[test]
    fn manual_reset_stays_signaled() {
        let event = SafeEvent::new(true, false).unwrap();
        event.signal().unwrap();
        assert_eq!(event.wait(0).unwrap(), WAIT_OBJECT_0.0);
        // A second wait still succeeds until somebody resets.
        assert_eq!(event.wait(0).unwrap(), WAIT_OBJECT_0.0);
    }
}
