//! Sorted packet I/O: per-adapter reads, sends, events and queue control.

use std::ffi::c_void;
use std::mem::size_of;

use windows::Win32::Foundation::HANDLE;

use super::NdisRd;
use crate::abi::*;
use crate::Result;

impl NdisRd {
    /// Registers `event` to be signaled whenever at least one packet is
    /// queued for `adapter`.
    pub fn set_packet_event(&self, adapter: AdapterHandle, event: HANDLE) -> Result<()> {
        let binding = AdapterEvent {
            adapter_handle: adapter,
            event_handle: event,
        };
        self.control_in(IOCTL_NDISRD_SET_EVENT, &binding)
    }

    /// Drops whatever is queued for `adapter` inside the driver.
    pub fn flush_adapter_packet_queue(&self, adapter: AdapterHandle) -> Result<()> {
        self.control_in(IOCTL_NDISRD_FLUSH_ADAPTER_QUEUE, &adapter)
    }

    /// Number of packets currently queued for `adapter`.
    pub fn adapter_packet_queue_size(&self, adapter: AdapterHandle) -> Result<u32> {
        let mut size = 0u32;
        self.control(
            IOCTL_NDISRD_ADAPTER_QUEUE_SIZE,
            Some(&adapter as *const AdapterHandle as *const c_void),
            size_of::<AdapterHandle>() as u32,
            Some(&mut size as *mut u32 as *mut c_void),
            size_of::<u32>() as u32,
            None,
            None,
        )?;
        Ok(size)
    }

    /// Reads one queued packet into the request's envelope. Returns
    /// `Ok(true)` when a packet was delivered, `Ok(false)` when nothing was
    /// queued this turn.
    pub fn read_packet(&self, request: &mut EtherRequestMut<'_>) -> Result<bool> {
        self.control(
            IOCTL_NDISRD_READ_PACKET,
            Some(request as *const EtherRequestMut<'_> as *const c_void),
            size_of::<EtherRequestMut<'_>>() as u32,
            Some(request as *mut EtherRequestMut<'_> as *mut c_void),
            size_of::<EtherRequestMut<'_>>() as u32,
            None,
            None,
        )?;
        Ok(request
            .packet
            .buffer
            .as_ref()
            .map(|buffer| buffer.length > 0)
            .unwrap_or(false))
    }

    /// Sends one packet towards the network interface.
    pub fn send_packet_to_adapter(&self, request: &EtherRequest<'_>) -> Result<()> {
        self.control(
            IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER,
            Some(request as *const EtherRequest<'_> as *const c_void),
            size_of::<EtherRequest<'_>>() as u32,
            None,
            0,
            None,
            None,
        )
    }

    /// Sends one packet up to the protocol stack.
    pub fn send_packet_to_mstcp(&self, request: &EtherRequest<'_>) -> Result<()> {
        self.control(
            IOCTL_NDISRD_SEND_PACKET_TO_MSTCP,
            Some(request as *const EtherRequest<'_> as *const c_void),
            size_of::<EtherRequest<'_>>() as u32,
            None,
            0,
            None,
            None,
        )
    }

    /// Reads a batch of queued packets for one adapter. The request's
    /// occupied slots are filled in arrival order; `Ok(true)` means at least
    /// one was filled.
    pub fn read_packets<const N: usize>(
        &self,
        request: &mut EtherMultiRequestMut<'_, N>,
    ) -> Result<bool> {
        let wire_size = request.wire_size() as u32;
        self.control(
            IOCTL_NDISRD_READ_PACKETS,
            Some(request as *const EtherMultiRequestMut<'_, N> as *const c_void),
            wire_size,
            Some(request as *mut EtherMultiRequestMut<'_, N> as *mut c_void),
            wire_size,
            None,
            None,
        )?;
        Ok(request.packet_success() > 0)
    }

    /// Sends a batch of packets towards the network interface.
    pub fn send_packets_to_adapter<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        self.control(
            IOCTL_NDISRD_SEND_PACKETS_TO_ADAPTER,
            Some(request as *const EtherMultiRequest<'_, N> as *const c_void),
            request.wire_size() as u32,
            None,
            0,
            None,
            None,
        )
    }

    /// Sends a batch of packets up to the protocol stack.
    pub fn send_packets_to_mstcp<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        self.control(
            IOCTL_NDISRD_SEND_PACKETS_TO_MSTCP,
            Some(request as *const EtherMultiRequest<'_, N> as *const c_void),
            request.wire_size() as u32,
            None,
            0,
            None,
            None,
        )
    }
}
