//! Fast-I/O registration and the cross-adapter (unsorted) packet paths.

use std::mem::size_of;

use super::NdisRd;
use crate::abi::*;
use crate::{Error, Result};

/// Smallest section the driver accepts: the header plus one envelope slot.
fn minimum_section_size() -> usize {
    size_of::<FastIoSectionHeader>() + size_of::<IntermediateBuffer>()
}

impl NdisRd {
    /// Registers the primary fast-I/O shared section.
    ///
    /// # Safety
    ///
    /// `section` must point to at least `size_bytes` bytes that remain valid
    /// and pinned until this handle is closed; the kernel writes into the
    /// memory concurrently from this call on.
    pub unsafe fn initialize_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()> {
        if (size_bytes as usize) < minimum_section_size() {
            return Err(Error::InvalidArgument);
        }
        let params = InitializeFastIoParams::<N> {
            header_ptr: section,
            data_size: size_bytes,
        };
        self.control_in(IOCTL_NDISRD_INITIALIZE_FAST_IO, &params)
    }

    /// Registers one additional fast-I/O shared section (up to three).
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::initialize_fast_io`].
    pub unsafe fn add_secondary_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        size_bytes: u32,
    ) -> Result<()> {
        if (size_bytes as usize) < minimum_section_size() {
            return Err(Error::InvalidArgument);
        }
        let params = InitializeFastIoParams::<N> {
            header_ptr: section,
            data_size: size_bytes,
        };
        self.control_in(IOCTL_NDISRD_ADD_SECOND_FAST_IO_SECTION, &params)
    }

    /// Reads up to `packets.len()` envelopes across all adapters; each filled
    /// envelope identifies its source adapter in its own header. Returns the
    /// number read.
    ///
    /// # Safety
    ///
    /// Every pointer in `packets` must reference a live, exclusively
    /// borrowed envelope for the duration of the call.
    pub unsafe fn read_packets_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut request = UnsortedReadSendRequest {
            packets: packets.as_mut_ptr(),
            packets_num: packets.len() as u32,
        };
        self.control_in_out(IOCTL_NDISRD_READ_PACKETS_UNSORTED, &mut request)?;
        Ok(request.packets_num as usize)
    }

    /// Injects envelopes towards the adapters named in their headers.
    /// Returns the number accepted; a short count is transient backpressure.
    ///
    /// # Safety
    ///
    /// Every pointer in `packets` must reference a live, exclusively
    /// borrowed envelope for the duration of the call.
    pub unsafe fn send_packets_to_adapters_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut request = UnsortedReadSendRequest {
            packets: packets.as_mut_ptr(),
            packets_num: packets.len() as u32,
        };
        self.control_in_out(IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER_UNSORTED, &mut request)?;
        Ok(request.packets_num as usize)
    }

    /// Injects envelopes up to the protocol stack, adapter taken from each
    /// envelope's header. Same short-count semantics as the adapter variant.
    ///
    /// # Safety
    ///
    /// Every pointer in `packets` must reference a live, exclusively
    /// borrowed envelope for the duration of the call.
    pub unsafe fn send_packets_to_mstcp_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut request = UnsortedReadSendRequest {
            packets: packets.as_mut_ptr(),
            packets_num: packets.len() as u32,
        };
        self.control_in_out(IOCTL_NDISRD_SEND_PACKET_TO_MSTCP_UNSORTED, &mut request)?;
        Ok(request.packets_num as usize)
    }
}
