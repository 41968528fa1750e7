//! Fixed-layout records exchanged with the NDIS filter driver.
//!
//! All structures are `#[repr(C, packed)]` renditions of the driver's own
//! headers; their byte layout is asserted by the tests at the bottom of this
//! file. Multi-packet requests end in an inlined array of pointer-sized
//! slots, so their wire size depends on the slot count — see
//! [`EtherMultiRequest::wire_size`].

use std::mem::size_of;

use windows::Win32::Foundation::HANDLE;

use super::constants::*;
use crate::{Error, Result};

/// Opaque adapter key handed out by the driver.
///
/// Always transported as an exact 8-byte sequence, independent of pointer
/// width, so requests serialize identically on x86 and x64. The zero value
/// means "any adapter" in filter rules.
#[repr(transparent)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AdapterHandle([u8; 8]);

impl AdapterHandle {
    /// The "any adapter" value used by filter rules.
    pub const ANY: AdapterHandle = AdapterHandle([0u8; 8]);

    /// Whether this is the "any adapter" value.
    pub fn is_any(&self) -> bool {
        self.0 == [0u8; 8]
    }

    /// The raw byte representation.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }
}

impl From<u64> for AdapterHandle {
    fn from(value: u64) -> Self {
        Self(value.to_ne_bytes())
    }
}

impl From<AdapterHandle> for u64 {
    fn from(handle: AdapterHandle) -> Self {
        u64::from_ne_bytes(handle.0)
    }
}

/// Adapter enumeration record returned by the get-interfaces ioctl.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct TcpAdapterList {
    /// Number of valid entries in the arrays below.
    pub adapter_count: u32,
    /// Internal device names, zero padded.
    pub adapter_name_list: [[u8; ADAPTER_NAME_SIZE]; ADAPTER_LIST_SIZE],
    /// Driver-issued adapter handles.
    pub adapter_handle: [AdapterHandle; ADAPTER_LIST_SIZE],
    /// NDIS medium of each adapter.
    pub adapter_medium_list: [u32; ADAPTER_LIST_SIZE],
    /// Configured hardware address of each adapter.
    pub current_address: [[u8; ETHER_ADDR_LENGTH]; ADAPTER_LIST_SIZE],
    /// Current MTU of each adapter.
    pub mtu: [u16; ADAPTER_LIST_SIZE],
}

impl Default for TcpAdapterList {
    fn default() -> Self {
        // All fields are plain integers and byte arrays; zero means "empty".
        unsafe { std::mem::zeroed() }
    }
}

impl TcpAdapterList {
    /// Number of adapters in the list.
    pub fn count(&self) -> usize {
        (self.adapter_count as usize).min(ADAPTER_LIST_SIZE)
    }

    /// The internal device name of entry `index`, with zero padding removed.
    /// Names longer than 255 bytes are truncated at the terminator.
    pub fn name(&self, index: usize) -> String {
        let raw = &self.adapter_name_list[index];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

/// The 16-byte leading field of a packet envelope.
///
/// In user space it carries the originating adapter handle; while the packet
/// sits in a kernel queue the same bytes are a doubly-linked queue link. The
/// producer writes the handle, the consumer must treat the link variant as
/// opaque.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union EnvelopeHeaderUnion {
    /// Originating (or, for unsorted sends, target) adapter handle.
    pub adapter_handle: AdapterHandle,
    /// Kernel queue linkage; opaque to user mode.
    pub qlink: [u64; 2],
}

impl Default for EnvelopeHeaderUnion {
    fn default() -> Self {
        // Both variants are plain bytes; zero is a valid "detached" state.
        unsafe { std::mem::zeroed() }
    }
}

/// Raw Ethernet II frame storage inside a packet envelope.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct FrameBuffer(pub [u8; MAX_ETHER_FRAME]);

impl Default for FrameBuffer {
    fn default() -> Self {
        Self([0u8; MAX_ETHER_FRAME])
    }
}

/// One packet envelope: a raw Ethernet frame plus interception metadata.
///
/// This is the unit the driver queues, the fast-I/O sections carry and the
/// classifiers inspect. `device_flags` holds exactly one direction bit;
/// `length` never exceeds [`MAX_ETHER_FRAME`]. Contents stay stable between
/// read completion and the dispatch decision.
#[repr(C, packed)]
#[derive(Copy, Clone, Default)]
pub struct IntermediateBuffer {
    /// Originating adapter handle / kernel queue link.
    pub header: EnvelopeHeaderUnion,
    /// Direction the frame was captured on (exactly one bit).
    pub device_flags: DirectionFlags,
    /// Valid bytes in `frame`.
    pub length: u32,
    /// NDIS packet flags as indicated by the miniport.
    pub ndis_flags: u32,
    /// 802.1Q tag associated with the frame.
    pub vlan_8021q: u32,
    /// Identifier of the static filter that diverted the frame.
    pub filter_id: u32,
    /// Reserved for the driver.
    pub reserved: [u32; 4],
    /// The raw Ethernet II frame.
    pub frame: FrameBuffer,
}

impl IntermediateBuffer {
    /// A zeroed, detached envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter this envelope originated from (user-space interpretation
    /// of the header union).
    pub fn adapter_handle(&self) -> AdapterHandle {
        unsafe { self.header.adapter_handle }
    }

    /// Stamps the originating / target adapter into the header union.
    pub fn set_adapter_handle(&mut self, handle: AdapterHandle) {
        self.header.adapter_handle = handle;
    }

    /// The direction bit set when the frame was captured.
    pub fn direction(&self) -> DirectionFlags {
        self.device_flags
    }

    /// The valid frame bytes.
    pub fn data(&self) -> &[u8] {
        let length = (self.length as usize).min(MAX_ETHER_FRAME);
        &self.frame.0[..length]
    }

    /// Mutable access to the valid frame bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let length = (self.length as usize).min(MAX_ETHER_FRAME);
        &mut self.frame.0[..length]
    }
}

/// One pointer-sized slot of a multi-packet request.
///
/// `Option<&IntermediateBuffer>` has the exact layout of the nullable pointer
/// the driver expects in each slot.
#[repr(C)]
#[derive(Default)]
pub struct EtherPacket<'a> {
    /// The envelope borrowed by the driver for the duration of the call.
    pub buffer: Option<&'a IntermediateBuffer>,
}

/// Mutable variant of [`EtherPacket`], used where the driver fills the
/// envelope (read paths).
#[repr(C)]
#[derive(Default)]
pub struct EtherPacketMut<'a> {
    /// The envelope the driver will write into.
    pub buffer: Option<&'a mut IntermediateBuffer>,
}

/// Single-packet request: one adapter handle and one envelope slot.
#[repr(C)]
pub struct EtherRequest<'a> {
    /// Adapter the request addresses.
    pub adapter_handle: AdapterHandle,
    /// The packet slot.
    pub packet: EtherPacket<'a>,
}

impl<'a> EtherRequest<'a> {
    /// Builds a request carrying `buffer` for `adapter_handle`.
    pub fn new(adapter_handle: AdapterHandle, buffer: &'a IntermediateBuffer) -> Self {
        Self {
            adapter_handle,
            packet: EtherPacket {
                buffer: Some(buffer),
            },
        }
    }
}

/// Mutable single-packet request for the read path.
#[repr(C)]
pub struct EtherRequestMut<'a> {
    /// Adapter the request addresses.
    pub adapter_handle: AdapterHandle,
    /// The packet slot the driver fills.
    pub packet: EtherPacketMut<'a>,
}

impl<'a> EtherRequestMut<'a> {
    /// Builds a request around `buffer` for `adapter_handle`.
    pub fn new(adapter_handle: AdapterHandle, buffer: &'a mut IntermediateBuffer) -> Self {
        Self {
            adapter_handle,
            packet: EtherPacketMut {
                buffer: Some(buffer),
            },
        }
    }
}

/// Multi-packet send request: header plus `N` borrowed envelope slots.
///
/// The driver reads `packet_number` slots and reports how many it accepted in
/// `packet_success`. Only the first `packet_number` slots are part of the
/// wire payload; see [`Self::wire_size`].
#[repr(C)]
pub struct EtherMultiRequest<'a, const N: usize> {
    adapter_handle: AdapterHandle,
    packet_number: u32,
    packet_success: u32,
    packets: [EtherPacket<'a>; N],
}

impl<'a, const N: usize> EtherMultiRequest<'a, N> {
    /// An empty request addressed to `adapter_handle`.
    pub fn new(adapter_handle: AdapterHandle) -> Self {
        Self {
            adapter_handle,
            packet_number: 0,
            packet_success: 0,
            packets: [(); N].map(|_| EtherPacket::default()),
        }
    }

    /// Builds a request from up to `N` borrowed envelopes.
    pub fn from_iter(
        adapter_handle: AdapterHandle,
        envelopes: impl Iterator<Item = &'a IntermediateBuffer>,
    ) -> Self {
        let mut request = Self::new(adapter_handle);
        for envelope in envelopes.take(N) {
            request.packets[request.packet_number as usize].buffer = Some(envelope);
            request.packet_number += 1;
        }
        request
    }

    /// Appends one envelope slot.
    pub fn push(&mut self, envelope: &'a IntermediateBuffer) -> Result<()> {
        if (self.packet_number as usize) < N {
            self.packets[self.packet_number as usize].buffer = Some(envelope);
            self.packet_number += 1;
            Ok(())
        } else {
            Err(Error::BufferTooSmall)
        }
    }

    /// The adapter this request addresses.
    pub fn adapter_handle(&self) -> AdapterHandle {
        self.adapter_handle
    }

    /// Number of occupied slots.
    pub fn packet_number(&self) -> u32 {
        self.packet_number
    }

    /// Number of packets the driver reported as processed.
    pub fn packet_success(&self) -> u32 {
        self.packet_success
    }

    /// The occupied slots in order.
    pub fn iter(&self) -> impl Iterator<Item = &IntermediateBuffer> {
        self.packets
            .iter()
            .take(self.packet_number as usize)
            .filter_map(|slot| slot.buffer)
    }

    /// Releases every slot and clears both counters.
    pub fn reset(&mut self) {
        for slot in self.packets.iter_mut() {
            slot.buffer = None;
        }
        self.packet_number = 0;
        self.packet_success = 0;
    }

    /// Byte size of the request as passed to the driver: the 16-byte header
    /// plus one pointer per occupied slot.
    pub fn wire_size(&self) -> usize {
        Self::wire_size_for(self.packet_number as usize)
    }

    /// Wire size for an arbitrary slot count.
    pub fn wire_size_for(count: usize) -> usize {
        size_of::<AdapterHandle>()
            + 2 * size_of::<u32>()
            + count.max(1) * size_of::<EtherPacket<'_>>()
    }
}

/// Multi-packet read request: header plus `N` mutable envelope slots the
/// driver fills in order.
#[repr(C)]
pub struct EtherMultiRequestMut<'a, const N: usize> {
    adapter_handle: AdapterHandle,
    packet_number: u32,
    packet_success: u32,
    packets: [EtherPacketMut<'a>; N],
}

impl<'a, const N: usize> EtherMultiRequestMut<'a, N> {
    /// An empty request addressed to `adapter_handle`.
    pub fn new(adapter_handle: AdapterHandle) -> Self {
        Self {
            adapter_handle,
            packet_number: 0,
            packet_success: 0,
            packets: [(); N].map(|_| EtherPacketMut::default()),
        }
    }

    /// Builds a request from up to `N` mutably borrowed envelopes.
    pub fn from_iter(
        adapter_handle: AdapterHandle,
        envelopes: impl Iterator<Item = &'a mut IntermediateBuffer>,
    ) -> Self {
        let mut request = Self::new(adapter_handle);
        for envelope in envelopes.take(N) {
            request.packets[request.packet_number as usize].buffer = Some(envelope);
            request.packet_number += 1;
        }
        request
    }

    /// The adapter this request addresses.
    pub fn adapter_handle(&self) -> AdapterHandle {
        self.adapter_handle
    }

    /// Number of occupied slots.
    pub fn packet_number(&self) -> u32 {
        self.packet_number
    }

    /// Number of envelopes the driver filled on the last read.
    pub fn packet_success(&self) -> u32 {
        self.packet_success
    }

    #[cfg(test)]
    pub(crate) fn set_packet_success(&mut self, value: u32) {
        self.packet_success = value;
    }

    /// Releases every slot and clears both counters.
    pub fn reset(&mut self) {
        for slot in self.packets.iter_mut() {
            slot.buffer = None;
        }
        self.packet_number = 0;
        self.packet_success = 0;
    }

    /// Byte size of the request as passed to the driver.
    pub fn wire_size(&self) -> usize {
        EtherMultiRequest::<N>::wire_size_for(self.packet_number as usize)
    }

    /// Mutable access to the occupied slots, in slot order. Used by the
    /// driver mock in tests to deposit synthetic envelopes.
    #[cfg(test)]
    pub(crate) fn slots_mut(
        &mut self,
    ) -> impl Iterator<Item = &mut IntermediateBuffer> + use<'_, 'a, N> {
        self.packets
            .iter_mut()
            .take(self.packet_number as usize)
            .filter_map(|slot| slot.buffer.as_deref_mut())
    }
}

/// Set-mode / get-mode payload: adapter handle plus interception flags.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, Default)]
pub struct AdapterMode {
    /// Adapter the mode applies to.
    pub adapter_handle: AdapterHandle,
    /// Interception flags.
    pub flags: FilterFlags,
}

/// Set-event payload: adapter handle plus the Win32 event to signal.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct AdapterEvent {
    /// Adapter whose queue signals the event.
    pub adapter_handle: AdapterHandle,
    /// Event handle to signal on packet arrival.
    pub event_handle: HANDLE,
}

/// NDIS OID get/set payload.
#[repr(C, packed)]
pub struct PacketOidData<T> {
    /// Adapter addressed by the request.
    pub adapter_handle: AdapterHandle,
    /// Object identifier of the queried / set parameter.
    pub oid: u32,
    /// Byte length of `data`.
    pub length: u32,
    /// The parameter value.
    pub data: T,
}

impl<T> PacketOidData<T> {
    /// Builds an OID request for `adapter_handle`.
    pub fn new(adapter_handle: AdapterHandle, oid: u32, data: T) -> Self {
        Self {
            adapter_handle,
            oid,
            length: size_of::<T>() as u32,
            data,
        }
    }
}

/// Information about one active RAS (dial-up / mobile broadband) link.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct RasLinkInfo {
    link_speed: u32,
    maximum_total_size: u32,
    remote_address: [u8; ETHER_ADDR_LENGTH],
    local_address: [u8; ETHER_ADDR_LENGTH],
    protocol_buffer_length: u32,
    protocol_buffer: [u8; RAS_LINK_BUFFER_LENGTH],
}

impl RasLinkInfo {
    /// Link speed in units of 100 bps.
    pub fn link_speed(&self) -> u32 {
        self.link_speed
    }

    /// Maximum bytes per packet on this link.
    pub fn maximum_total_size(&self) -> u32 {
        self.maximum_total_size
    }

    /// Remote node address in Ethernet format.
    pub fn remote_address(&self) -> &[u8; ETHER_ADDR_LENGTH] {
        &self.remote_address
    }

    /// Local node address in Ethernet format.
    pub fn local_address(&self) -> &[u8; ETHER_ADDR_LENGTH] {
        &self.local_address
    }

    /// The protocol-specific information supplied by NDISWAN.
    pub fn protocol_buffer(&self) -> &[u8] {
        let length = (self.protocol_buffer_length as usize).min(RAS_LINK_BUFFER_LENGTH);
        &self.protocol_buffer[..length]
    }
}

/// Container filled by the get-RAS-links ioctl.
///
/// Roughly half a megabyte; allocate it with [`RasLinks::new_boxed`] rather
/// than on a worker stack.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct RasLinks {
    number_of_links: u32,
    /// The per-link records; only the first [`Self::number_of_links`] are valid.
    pub ras_links: [RasLinkInfo; RAS_LINKS_MAX],
}

impl RasLinks {
    /// Heap-allocates a zeroed record ready to pass to the driver.
    pub fn new_boxed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        // Zeroed memory is a valid empty record.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr as *mut Self)
        }
    }

    /// Number of valid entries in [`Self::ras_links`].
    pub fn number_of_links(&self) -> usize {
        (self.number_of_links as usize).min(RAS_LINKS_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_layout() {
        // 16-byte header union, five u32 metadata words, four reserved u32,
        // 1514 frame bytes.
        assert_eq!(size_of::<EnvelopeHeaderUnion>(), 16);
        assert_eq!(size_of::<IntermediateBuffer>(), 16 + 4 * 5 + 16 + 1514);
        assert_eq!(size_of::<IntermediateBuffer>(), 1566);
    }

    #[test]
    fn envelope_field_offsets() {
        let envelope = IntermediateBuffer::new();
        let base = &envelope as *const _ as usize;
        assert_eq!(std::ptr::addr_of!(envelope.device_flags) as usize - base, 16);
        assert_eq!(std::ptr::addr_of!(envelope.length) as usize - base, 20);
        assert_eq!(std::ptr::addr_of!(envelope.ndis_flags) as usize - base, 24);
        assert_eq!(std::ptr::addr_of!(envelope.vlan_8021q) as usize - base, 28);
        assert_eq!(std::ptr::addr_of!(envelope.filter_id) as usize - base, 32);
        assert_eq!(std::ptr::addr_of!(envelope.reserved) as usize - base, 36);
        assert_eq!(std::ptr::addr_of!(envelope.frame) as usize - base, 52);
    }

    #[test]
    fn adapter_list_layout() {
        assert_eq!(
            size_of::<TcpAdapterList>(),
            4 + 32 * (256 + 8 + 4 + 6 + 2)
        );
        assert_eq!(size_of::<TcpAdapterList>(), 8836);
    }

    #[test]
    fn packet_slot_is_pointer_sized() {
        assert_eq!(size_of::<EtherPacket<'_>>(), size_of::<*const IntermediateBuffer>());
        assert_eq!(size_of::<EtherPacketMut<'_>>(), size_of::<*mut IntermediateBuffer>());
    }

    #[test]
    fn multi_request_wire_size() {
        // 16-byte header plus one pointer per slot; the empty request still
        // carries one slot, matching the driver's flexible-array convention.
        let pointer = size_of::<*const IntermediateBuffer>();
        assert_eq!(EtherMultiRequest::<510>::wire_size_for(1), 16 + pointer);
        assert_eq!(
            EtherMultiRequest::<510>::wire_size_for(510),
            16 + 510 * pointer
        );
        assert_eq!(
            size_of::<EtherMultiRequest<'_, 1>>(),
            EtherMultiRequest::<1>::wire_size_for(1)
        );
    }

    #[test]
    fn multi_request_push_and_reset() {
        let envelopes = vec![IntermediateBuffer::new(); 4];
        let mut request = EtherMultiRequest::<4>::new(AdapterHandle::from(1));
        for envelope in &envelopes {
            request.push(envelope).unwrap();
        }
        assert_eq!(request.packet_number(), 4);
        assert!(request.push(&envelopes[0]).is_err());

        request.reset();
        assert_eq!(request.packet_number(), 0);
        assert_eq!(request.packet_success(), 0);
    }

    #[test]
    fn adapter_handle_round_trip() {
        let handle = AdapterHandle::from(0xdead_beef_u64);
        assert_eq!(u64::from(handle), 0xdead_beef);
        assert!(!handle.is_any());
        assert!(AdapterHandle::ANY.is_any());
    }

    #[test]
    fn envelope_header_carries_handle() {
        let mut envelope = IntermediateBuffer::new();
        envelope.set_adapter_handle(AdapterHandle::from(42u64));
        assert_eq!(u64::from(envelope.adapter_handle()), 42);
    }

    #[test]
    fn oid_data_length_matches_payload() {
        let oid = PacketOidData::new(AdapterHandle::ANY, 0x0001_010E, 0u32);
        assert_eq!({ oid.length }, 4);
    }
}
