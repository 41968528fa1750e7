//! Driver handle and the complete ioctl surface.
//!
//! [`NdisRd`] owns the device handle for `\\.\NDISRD` and funnels every
//! kernel interaction through one synchronous [`NdisRd::control`] primitive.
//! The operations themselves are grouped into submodules mirroring the
//! driver's functional areas: adapter/base queries, packet I/O, fast I/O and
//! the static filter table, plus the registry-side controls that configure
//! the driver across reboots.
//!
//! [`DriverIo`] abstracts the subset of the surface that the adapter facade,
//! the filter table and the engines consume, so all of them can be exercised
//! against a scripted driver in tests.

use std::ffi::c_void;
use std::fmt::{Display, Formatter};

use windows::{
    core::w,
    Win32::Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE},
    Win32::Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    },
    Win32::System::IO::{DeviceIoControl, OVERLAPPED},
};

use crate::abi::*;
use crate::adapter::NdisWanKind;
use crate::event::SafeEvent;
use crate::{Error, Result};

mod base;
mod fastio;
mod filters;
mod io;
mod registry;

pub use self::base::Version;

/// Everything the adapter facade, the static filter table and the filter
/// engines need from the driver.
///
/// [`NdisRd`] is the production implementation; tests substitute a scripted
/// driver. Methods taking raw envelope pointers are `unsafe`: the caller
/// guarantees every pointer stays valid and exclusively borrowed for the
/// duration of the call, because the driver dereferences them.
pub trait DriverIo: Send + Sync + 'static {
    /// Whether the device was opened successfully.
    fn is_driver_loaded(&self) -> bool;

    /// Raw driver version word.
    fn driver_version(&self) -> Result<u32>;

    /// Effective size of the driver's intermediate-buffer pool.
    fn intermediate_buffer_pool_size(&self) -> Result<u32>;

    /// Enumerates the TCP/IP-bound adapters.
    fn tcpip_bound_adapters(&self) -> Result<TcpAdapterList>;

    /// Sets the interception mode of one adapter.
    fn set_adapter_mode(&self, adapter: AdapterHandle, flags: FilterFlags) -> Result<()>;

    /// Reads back the interception mode of one adapter.
    fn adapter_mode(&self, adapter: AdapterHandle) -> Result<FilterFlags>;

    /// Discards everything queued for one adapter inside the driver.
    fn flush_adapter_packet_queue(&self, adapter: AdapterHandle) -> Result<()>;

    /// Number of packets currently queued for one adapter.
    fn adapter_packet_queue_size(&self, adapter: AdapterHandle) -> Result<u32>;

    /// Registers the event signaled when packets are queued for the adapter.
    fn set_packet_event(&self, adapter: AdapterHandle, event: HANDLE) -> Result<()>;

    /// Registers the event signaled when the adapter list changes.
    fn set_adapter_list_change_event(&self, event: HANDLE) -> Result<()>;

    /// Reads a batch of packets for one adapter. `Ok(true)` means at least
    /// one envelope was filled; `Ok(false)` means nothing was queued and the
    /// caller should wait on the packet event.
    fn read_packets<const N: usize>(
        &self,
        request: &mut EtherMultiRequestMut<'_, N>,
    ) -> Result<bool>;

    /// Sends a batch of packets towards the network interface.
    fn send_packets_to_adapter<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()>;

    /// Sends a batch of packets up to the protocol stack.
    fn send_packets_to_mstcp<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()>;

    /// Reads up to `packets.len()` envelopes across all adapters. Each filled
    /// envelope carries its originating adapter in its header.
    ///
    /// # Safety
    ///
    /// Every pointer must reference a live, exclusively borrowed envelope.
    unsafe fn read_packets_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize>;

    /// Injects envelopes towards their respective adapters. Returns the
    /// number actually accepted; a short count is transient backpressure and
    /// the caller retries with the tail.
    ///
    /// # Safety
    ///
    /// Every pointer must reference a live, exclusively borrowed envelope.
    unsafe fn send_packets_to_adapters_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize>;

    /// Injects envelopes up to the protocol stack, adapter taken from each
    /// envelope's header. Same short-count semantics as the adapter variant.
    ///
    /// # Safety
    ///
    /// Every pointer must reference a live, exclusively borrowed envelope.
    unsafe fn send_packets_to_mstcp_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize>;

    /// Registers the primary fast-I/O section.
    ///
    /// # Safety
    ///
    /// `section` must point to a live allocation of at least `size_bytes`
    /// bytes that stays valid until the handle is closed; after this call the
    /// kernel writes into it concurrently.
    unsafe fn initialize_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()>;

    /// Registers one additional fast-I/O section.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::initialize_fast_io`].
    unsafe fn add_secondary_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()>;

    /// Installs a serialized filter table; `None` clears all filters.
    fn set_packet_filter_table(&self, table: Option<&[u8]>) -> Result<()>;

    /// Clears the installed filter table.
    fn reset_packet_filter_table(&self) -> Result<()>;

    /// Number of rules currently installed.
    fn packet_filter_table_size(&self) -> Result<usize>;

    /// Reads the installed table (header plus rows) into `out`, optionally
    /// resetting the per-rule counters. Fails with
    /// [`Error::BufferTooSmall`] when `out` cannot hold the table.
    fn read_packet_filter_table(&self, out: &mut [u8], reset_stats: bool) -> Result<()>;

    /// Prepends one rule to the installed table.
    fn add_filter_front(&self, filter: &StaticFilter) -> Result<()>;

    /// Appends one rule to the installed table.
    fn add_filter_back(&self, filter: &StaticFilter) -> Result<()>;

    /// Inserts one rule at `position` in the installed table.
    fn insert_filter(&self, filter: &StaticFilter, position: u32) -> Result<()>;

    /// Removes the rule at `position` from the installed table.
    fn remove_filter(&self, position: u32) -> Result<()>;

    /// Toggles the kernel filter-match cache.
    fn set_packet_filter_cache_state(&self, enabled: bool) -> Result<()>;

    /// Toggles the kernel fragment cache.
    fn set_packet_fragment_cache_state(&self, enabled: bool) -> Result<()>;

    /// Resolves the human-readable connection name of an adapter, falling
    /// back to the internal name when the host has none.
    fn friendly_adapter_name(&self, internal_name: &str) -> String;

    /// Classifies an adapter as regular or one of the NDISWAN variants.
    fn classify_wan_kind(&self, internal_name: &str) -> NdisWanKind;
}

/// Owned handle to the NDIS filter driver device.
pub struct NdisRd {
    device: HANDLE,
    overlapped_event: SafeEvent,
}

impl NdisRd {
    /// Opens `\\.\NDISRD` with read/write access and creates the auto-reset
    /// event used for overlapped control operations.
    pub fn open() -> Result<Self> {
        let device = unsafe {
            CreateFileW(
                w!("\\\\.\\NDISRD"),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                HANDLE::default(),
            )
        }
        .map_err(|_| Error::DriverUnavailable)?;

        Ok(Self {
            device,
            overlapped_event: SafeEvent::new(false, false)?,
        })
    }

    /// Whether the device handle is usable.
    pub fn is_driver_loaded(&self) -> bool {
        !self.device.is_invalid() && self.device != INVALID_HANDLE_VALUE
    }

    /// The auto-reset event associated with this handle, for callers issuing
    /// overlapped control operations.
    pub fn overlapped_event(&self) -> &SafeEvent {
        &self.overlapped_event
    }

    /// Issues one synchronous device control operation.
    ///
    /// The caller supplies fully sized buffers; `returned` receives the byte
    /// count the driver produced when requested. This is the only call site
    /// of `DeviceIoControl` in the crate.
    pub fn control(
        &self,
        code: u32,
        in_ptr: Option<*const c_void>,
        in_size: u32,
        out_ptr: Option<*mut c_void>,
        out_size: u32,
        returned: Option<*mut u32>,
        overlapped: Option<*mut OVERLAPPED>,
    ) -> Result<()> {
        if !self.is_driver_loaded() {
            return Err(Error::NotInitialized);
        }

        let ok = unsafe {
            DeviceIoControl(
                self.device,
                code,
                in_ptr,
                in_size,
                out_ptr,
                out_size,
                returned,
                overlapped,
            )
        };

        if ok.as_bool() {
            Ok(())
        } else {
            Err(Error::from_last_win32())
        }
    }

    /// Shorthand for a control call passing one input record.
    pub(crate) fn control_in<T>(&self, code: u32, input: &T) -> Result<()> {
        self.control(
            code,
            Some(input as *const T as *const c_void),
            std::mem::size_of::<T>() as u32,
            None,
            0,
            None,
            None,
        )
    }

    /// Shorthand for a control call filling one output record.
    pub(crate) fn control_out<T>(&self, code: u32, output: &mut T) -> Result<()> {
        self.control(
            code,
            None,
            0,
            Some(output as *mut T as *mut c_void),
            std::mem::size_of::<T>() as u32,
            None,
            None,
        )
    }

    /// Shorthand for a control call where one record is both input and
    /// output.
    pub(crate) fn control_in_out<T>(&self, code: u32, in_out: &mut T) -> Result<()> {
        self.control(
            code,
            Some(in_out as *const T as *const c_void),
            std::mem::size_of::<T>() as u32,
            Some(in_out as *mut T as *mut c_void),
            std::mem::size_of::<T>() as u32,
            None,
            None,
        )
    }
}

impl Drop for NdisRd {
    fn drop(&mut self) {
        // The owned event closes itself; the device handle is ours to close.
        if self.is_driver_loaded() {
            unsafe {
                CloseHandle(self.device);
            }
        }
    }
}

// The device handle is only used through thread-safe kernel calls.
unsafe impl Send for NdisRd {}
unsafe impl Sync for NdisRd {}

impl Display for NdisRd {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NdisRd(loaded: {})", self.is_driver_loaded())
    }
}

impl DriverIo for NdisRd {
    fn is_driver_loaded(&self) -> bool {
        NdisRd::is_driver_loaded(self)
    }

    fn driver_version(&self) -> Result<u32> {
        self.version_word()
    }

    fn intermediate_buffer_pool_size(&self) -> Result<u32> {
        NdisRd::intermediate_buffer_pool_size(self)
    }

    fn tcpip_bound_adapters(&self) -> Result<TcpAdapterList> {
        NdisRd::tcpip_bound_adapters(self)
    }

    fn set_adapter_mode(&self, adapter: AdapterHandle, flags: FilterFlags) -> Result<()> {
        NdisRd::set_adapter_mode(self, adapter, flags)
    }

    fn adapter_mode(&self, adapter: AdapterHandle) -> Result<FilterFlags> {
        NdisRd::adapter_mode(self, adapter)
    }

    fn flush_adapter_packet_queue(&self, adapter: AdapterHandle) -> Result<()> {
        NdisRd::flush_adapter_packet_queue(self, adapter)
    }

    fn adapter_packet_queue_size(&self, adapter: AdapterHandle) -> Result<u32> {
        NdisRd::adapter_packet_queue_size(self, adapter)
    }

    fn set_packet_event(&self, adapter: AdapterHandle, event: HANDLE) -> Result<()> {
        NdisRd::set_packet_event(self, adapter, event)
    }

    fn set_adapter_list_change_event(&self, event: HANDLE) -> Result<()> {
        NdisRd::set_adapter_list_change_event(self, event)
    }

    fn read_packets<const N: usize>(
        &self,
        request: &mut EtherMultiRequestMut<'_, N>,
    ) -> Result<bool> {
        NdisRd::read_packets(self, request)
    }

    fn send_packets_to_adapter<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        NdisRd::send_packets_to_adapter(self, request)
    }

    fn send_packets_to_mstcp<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        NdisRd::send_packets_to_mstcp(self, request)
    }

    unsafe fn read_packets_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        NdisRd::read_packets_unsorted(self, packets)
    }

    unsafe fn send_packets_to_adapters_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        NdisRd::send_packets_to_adapters_unsorted(self, packets)
    }

    unsafe fn send_packets_to_mstcp_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        NdisRd::send_packets_to_mstcp_unsorted(self, packets)
    }

    unsafe fn initialize_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()> {
        NdisRd::initialize_fast_io(self, section, size_bytes)
    }

    unsafe fn add_secondary_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()> {
        NdisRd::add_secondary_fast_io(self, section, size_bytes)
    }

    fn set_packet_filter_table(&self, table: Option<&[u8]>) -> Result<()> {
        NdisRd::set_packet_filter_table(self, table)
    }

    fn reset_packet_filter_table(&self) -> Result<()> {
        NdisRd::reset_packet_filter_table(self)
    }

    fn packet_filter_table_size(&self) -> Result<usize> {
        NdisRd::packet_filter_table_size(self)
    }

    fn read_packet_filter_table(&self, out: &mut [u8], reset_stats: bool) -> Result<()> {
        NdisRd::read_packet_filter_table(self, out, reset_stats)
    }

    fn add_filter_front(&self, filter: &StaticFilter) -> Result<()> {
        NdisRd::add_filter_front(self, filter)
    }

    fn add_filter_back(&self, filter: &StaticFilter) -> Result<()> {
        NdisRd::add_filter_back(self, filter)
    }

    fn insert_filter(&self, filter: &StaticFilter, position: u32) -> Result<()> {
        NdisRd::insert_filter(self, filter, position)
    }

    fn remove_filter(&self, position: u32) -> Result<()> {
        NdisRd::remove_filter(self, position)
    }

    fn set_packet_filter_cache_state(&self, enabled: bool) -> Result<()> {
        NdisRd::set_packet_filter_cache_state(self, enabled)
    }

    fn set_packet_fragment_cache_state(&self, enabled: bool) -> Result<()> {
        NdisRd::set_packet_fragment_cache_state(self, enabled)
    }

    fn friendly_adapter_name(&self, internal_name: &str) -> String {
        NdisRd::friendly_adapter_name(internal_name)
            .unwrap_or_else(|_| internal_name.to_owned())
    }

    fn classify_wan_kind(&self, internal_name: &str) -> NdisWanKind {
        NdisRd::classify_wan_kind(internal_name)
    }
}
