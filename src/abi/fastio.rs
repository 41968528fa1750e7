//! Fast-I/O shared-section and unsorted-request records.
//!
//! A fast-I/O section is a block of memory shared between the driver
//! (producer) and one user-mode consumer. Its header packs the producer
//! state into a single 32-bit word — number of packets written in the low
//! half, write-in-progress flag in the high half — so both sides can observe
//! it with one atomic access. The consumer advertises itself through the
//! separate read-in-progress word.

use super::records::IntermediateBuffer;

/// The two halves of the packed producer-state word.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct FastIoWriteState {
    /// Number of envelopes published in this section.
    pub number_of_packets: u16,
    /// Non-zero while the producer is still copying the last envelope.
    pub write_in_progress_flag: u16,
}

/// Packed producer-state word: split halves or the joined 32-bit value.
///
/// All cross-side accesses go through the `join` representation with atomic
/// loads and stores; bit-level stores from user space would race the kernel.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union FastIoWriteUnion {
    /// Separate halves.
    pub split: FastIoWriteState,
    /// The joined word.
    pub join: u32,
}

impl Default for FastIoWriteUnion {
    fn default() -> Self {
        FastIoWriteUnion { join: 0 }
    }
}

/// Header of a fast-I/O section.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct FastIoSectionHeader {
    /// Producer state word.
    pub fast_io_write_union: FastIoWriteUnion,
    /// Non-zero while the consumer drains the section.
    pub read_in_progress_flag: u32,
}

/// One fast-I/O section: header plus `N` envelope slots.
#[repr(C, packed)]
pub struct FastIoSection<const N: usize> {
    /// Shared coordination state.
    pub fast_io_header: FastIoSectionHeader,
    /// Envelope slots the driver writes in publication order.
    pub fast_io_packets: [IntermediateBuffer; N],
}

impl<const N: usize> FastIoSection<N> {
    /// Heap-allocates a zeroed section. Sections run to several megabytes, so
    /// they never live on a stack.
    pub fn new_boxed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        // Zeroed memory is the idle section state.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr as *mut Self)
        }
    }
}

/// Payload of the fast-I/O registration ioctls.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct InitializeFastIoParams<const N: usize> {
    /// User-space base address of the section.
    pub header_ptr: *mut FastIoSection<N>,
    /// Total section size in bytes.
    pub data_size: u32,
}

/// Cross-adapter read/send request: a pointer array plus its occupancy.
///
/// Unlike the sorted multi-packet request, the envelopes may belong to
/// different adapters; each envelope's own header identifies its adapter.
/// The same memory may serve as both in-slots and out-slots.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct UnsortedReadSendRequest {
    /// Pointer to the first element of the caller's pointer array.
    pub packets: *mut *mut IntermediateBuffer,
    /// Number of valid pointers in the array.
    pub packets_num: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn header_layout() {
        assert_eq!(size_of::<FastIoWriteUnion>(), 4);
        assert_eq!(size_of::<FastIoSectionHeader>(), 8);
    }

    #[test]
    fn section_is_header_plus_envelopes() {
        assert_eq!(
            size_of::<FastIoSection<4>>(),
            8 + 4 * size_of::<IntermediateBuffer>()
        );
    }

    #[test]
    fn write_union_halves_share_the_word() {
        let mut word = FastIoWriteUnion::default();
        word.split = FastIoWriteState {
            number_of_packets: 5,
            write_in_progress_flag: 1,
        };
        let join = unsafe { word.join };
        assert_eq!(join & 0xffff, 5);
        assert_eq!(join >> 16, 1);
    }

    #[test]
    fn unsorted_request_layout() {
        assert_eq!(
            size_of::<UnsortedReadSendRequest>(),
            size_of::<*mut *mut IntermediateBuffer>() + 4
        );
    }
}
