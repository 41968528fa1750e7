//! Test doubles: a scripted driver behind the [`DriverIo`] seam.
//!
//! The mock keeps per-adapter packet queues, signals the Win32 events the
//! engines registered, records everything injected back and serves the
//! static-filter surface from an in-memory table, so engine and table logic
//! can be exercised without the kernel driver.

use std::collections::{HashMap, VecDeque};
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Threading::SetEvent;

use crate::abi::*;
use crate::adapter::NdisWanKind;
use crate::api::DriverIo;
use crate::{Error, Result};

/// Polls `predicate` for up to five seconds.
pub(crate) fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Fabricates one envelope with a payload marker byte at offset zero.
pub(crate) fn envelope_with(
    handle: AdapterHandle,
    on_send: bool,
    length: u32,
    marker: u8,
) -> IntermediateBuffer {
    let mut envelope = IntermediateBuffer::new();
    envelope.set_adapter_handle(handle);
    envelope.device_flags = if on_send {
        DirectionFlags::PACKET_FLAG_ON_SEND
    } else {
        DirectionFlags::PACKET_FLAG_ON_RECEIVE
    };
    envelope.length = length;
    envelope.frame.0[0] = marker;
    envelope
}

/// Fabricates one outbound envelope.
pub(crate) fn on_send_envelope(
    handle: AdapterHandle,
    length: u32,
    marker: u8,
) -> IntermediateBuffer {
    envelope_with(handle, true, length, marker)
}

struct AdapterEntry {
    handle: AdapterHandle,
    name: String,
}

#[derive(Default)]
struct MockState {
    adapters: Vec<AdapterEntry>,
    queues: HashMap<u64, VecDeque<IntermediateBuffer>>,
    unsorted_queue: VecDeque<IntermediateBuffer>,
    packet_events: HashMap<u64, isize>,
    adapter_list_event: Option<isize>,
    modes: HashMap<u64, FilterFlags>,
    flushed: Vec<u64>,
    sent_to_adapter: Vec<IntermediateBuffer>,
    sent_to_stack: Vec<IntermediateBuffer>,
    unsorted_to_adapter: Vec<IntermediateBuffer>,
    unsorted_to_stack: Vec<IntermediateBuffer>,
    read_batches: usize,
    fastio_sections: Vec<usize>,
    filters: Vec<StaticFilter>,
    filter_cache: Option<bool>,
    fragment_cache: Option<bool>,
    stats_bump: Option<(u64, u64)>,
    understate_size: bool,
}

/// Scripted driver for unit tests.
pub(crate) struct MockDriver {
    loaded: bool,
    next_handle: AtomicU64,
    state: Mutex<MockState>,
    adapter_sends_paused: Mutex<bool>,
    adapter_sends_cv: Condvar,
}

impl MockDriver {
    pub(crate) fn new() -> Self {
        Self {
            loaded: true,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(MockState::default()),
            adapter_sends_paused: Mutex::new(false),
            adapter_sends_cv: Condvar::new(),
        }
    }

    /// A driver whose device could not be opened.
    pub(crate) fn unloaded() -> Self {
        Self {
            loaded: false,
            ..Self::new()
        }
    }

    pub(crate) fn add_adapter(&self, name: &str) -> AdapterHandle {
        let handle = AdapterHandle::from(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.state.lock().adapters.push(AdapterEntry {
            handle,
            name: name.to_owned(),
        });
        handle
    }

    pub(crate) fn remove_adapter(&self, handle: AdapterHandle) {
        self.state
            .lock()
            .adapters
            .retain(|entry| entry.handle != handle);
    }

    fn signal_raw(raw: isize) {
        if raw != 0 {
            unsafe {
                SetEvent(HANDLE(raw));
            }
        }
    }

    /// Queues one envelope for a sorted read and signals the adapter's
    /// packet event.
    pub(crate) fn enqueue_packet(&self, handle: AdapterHandle, envelope: IntermediateBuffer) {
        let raw = {
            let mut state = self.state.lock();
            state
                .queues
                .entry(u64::from(handle))
                .or_default()
                .push_back(envelope);
            state.packet_events.get(&u64::from(handle)).copied()
        };
        if let Some(raw) = raw {
            Self::signal_raw(raw);
        }
    }

    /// Queues one envelope for a cross-adapter read; its header already
    /// names the originating adapter.
    pub(crate) fn enqueue_unsorted(&self, envelope: IntermediateBuffer) {
        self.state.lock().unsorted_queue.push_back(envelope);
    }

    /// Appends envelopes to a registered fast-I/O section and publishes the
    /// new count, the way the kernel producer does.
    pub(crate) fn publish_fast_io(&self, index: usize, envelopes: &[IntermediateBuffer]) {
        let base = self.state.lock().fastio_sections[index];
        unsafe {
            let join = &*(base as *const AtomicU32);
            let already = (join.load(Ordering::Acquire) & 0xffff) as usize;
            let packets =
                (base as *mut u8).add(size_of::<FastIoSectionHeader>()) as *mut IntermediateBuffer;
            for (offset, envelope) in envelopes.iter().enumerate() {
                ptr::write_unaligned(packets.add(already + offset), *envelope);
            }
            join.store((already + envelopes.len()) as u32, Ordering::Release);
        }
    }

    /// Signals every packet event any adapter has registered.
    pub(crate) fn signal_packet_events(&self) {
        let raws: Vec<isize> = self.state.lock().packet_events.values().copied().collect();
        for raw in raws {
            Self::signal_raw(raw);
        }
    }

    pub(crate) fn trigger_adapter_change(&self) {
        if let Some(raw) = self.state.lock().adapter_list_event {
            Self::signal_raw(raw);
        }
    }

    pub(crate) fn has_packet_event(&self, handle: AdapterHandle) -> bool {
        self.state
            .lock()
            .packet_events
            .get(&u64::from(handle))
            .map(|&raw| raw != 0)
            .unwrap_or(false)
    }

    pub(crate) fn was_flushed(&self, handle: AdapterHandle) -> bool {
        self.state.lock().flushed.contains(&u64::from(handle))
    }

    pub(crate) fn sent_to_adapter(&self) -> Vec<IntermediateBuffer> {
        self.state.lock().sent_to_adapter.clone()
    }

    pub(crate) fn sent_to_stack(&self) -> Vec<IntermediateBuffer> {
        self.state.lock().sent_to_stack.clone()
    }

    pub(crate) fn unsorted_to_adapter(&self) -> Vec<IntermediateBuffer> {
        self.state.lock().unsorted_to_adapter.clone()
    }

    pub(crate) fn unsorted_to_stack(&self) -> Vec<IntermediateBuffer> {
        self.state.lock().unsorted_to_stack.clone()
    }

    pub(crate) fn read_batches(&self) -> usize {
        self.state.lock().read_batches
    }

    pub(crate) fn fast_io_section_count(&self) -> usize {
        self.state.lock().fastio_sections.len()
    }

    /// Makes sorted sends towards the adapter block until resumed.
    pub(crate) fn pause_adapter_sends(&self) {
        *self.adapter_sends_paused.lock() = true;
    }

    pub(crate) fn resume_adapter_sends(&self) {
        *self.adapter_sends_paused.lock() = false;
        self.adapter_sends_cv.notify_all();
    }

    fn wait_adapter_send_gate(&self) {
        let mut paused = self.adapter_sends_paused.lock();
        while *paused {
            self.adapter_sends_cv.wait(&mut paused);
        }
    }

    /// Adds `(packets, bytes)` to every rule's receive counters on the next
    /// read-back, imitating driver-side accounting.
    pub(crate) fn bump_filter_stats(&self, packets: u64, bytes: u64) {
        self.state.lock().stats_bump = Some((packets, bytes));
    }

    /// Makes the table-size query under-report, forcing the grow-and-retry
    /// path in the reader.
    pub(crate) fn understate_table_size(&self) {
        self.state.lock().understate_size = true;
    }

    fn table_bytes(state: &MockState, reset_stats: bool, out: &mut [u8]) -> Result<()> {
        let needed =
            size_of::<StaticFilterTable<0>>() + state.filters.len() * size_of::<StaticFilter>();
        if out.len() < needed {
            return Err(Error::BufferTooSmall);
        }
        out[..4].copy_from_slice(&(state.filters.len() as u32).to_ne_bytes());
        out[4..8].fill(0);

        for (index, row) in state.filters.iter().enumerate() {
            let mut row = *row;
            if let Some((packets, bytes)) = state.stats_bump {
                if !reset_stats {
                    row.packets_in = packets;
                    row.bytes_in = bytes;
                }
            }
            let offset = size_of::<StaticFilterTable<0>>() + index * size_of::<StaticFilter>();
            unsafe {
                ptr::write_unaligned(out.as_mut_ptr().add(offset) as *mut StaticFilter, row);
            }
        }
        Ok(())
    }
}

impl DriverIo for MockDriver {
    fn is_driver_loaded(&self) -> bool {
        self.loaded
    }

    fn driver_version(&self) -> Result<u32> {
        Ok(0x0403_3000)
    }

    fn intermediate_buffer_pool_size(&self) -> Result<u32> {
        Ok(16)
    }

    fn tcpip_bound_adapters(&self) -> Result<TcpAdapterList> {
        let state = self.state.lock();
        let mut list = TcpAdapterList::default();
        list.adapter_count = state.adapters.len() as u32;
        for (index, entry) in state.adapters.iter().enumerate().take(ADAPTER_LIST_SIZE) {
            let bytes = entry.name.as_bytes();
            list.adapter_name_list[index][..bytes.len()].copy_from_slice(bytes);
            list.adapter_handle[index] = entry.handle;
            list.adapter_medium_list[index] = 0;
            list.current_address[index] = [0x02, 0, 0, 0, 0, index as u8];
            list.mtu[index] = 1500;
        }
        Ok(list)
    }

    fn set_adapter_mode(&self, adapter: AdapterHandle, flags: FilterFlags) -> Result<()> {
        self.state.lock().modes.insert(u64::from(adapter), flags);
        Ok(())
    }

    fn adapter_mode(&self, adapter: AdapterHandle) -> Result<FilterFlags> {
        Ok(self
            .state
            .lock()
            .modes
            .get(&u64::from(adapter))
            .copied()
            .unwrap_or_default())
    }

    fn flush_adapter_packet_queue(&self, adapter: AdapterHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.flushed.push(u64::from(adapter));
        state.queues.remove(&u64::from(adapter));
        Ok(())
    }

    fn adapter_packet_queue_size(&self, adapter: AdapterHandle) -> Result<u32> {
        Ok(self
            .state
            .lock()
            .queues
            .get(&u64::from(adapter))
            .map(|queue| queue.len() as u32)
            .unwrap_or(0))
    }

    fn set_packet_event(&self, adapter: AdapterHandle, event: HANDLE) -> Result<()> {
        let mut state = self.state.lock();
        if event.0 == 0 {
            state.packet_events.remove(&u64::from(adapter));
        } else {
            state.packet_events.insert(u64::from(adapter), event.0);
        }
        Ok(())
    }

    fn set_adapter_list_change_event(&self, event: HANDLE) -> Result<()> {
        self.state.lock().adapter_list_event = Some(event.0);
        Ok(())
    }

    fn read_packets<const N: usize>(
        &self,
        request: &mut EtherMultiRequestMut<'_, N>,
    ) -> Result<bool> {
        let handle = request.adapter_handle();
        let mut popped = Vec::new();
        {
            let mut state = self.state.lock();
            let capacity = request.packet_number() as usize;
            if let Some(queue) = state.queues.get_mut(&u64::from(handle)) {
                while popped.len() < capacity {
                    match queue.pop_front() {
                        Some(envelope) => popped.push(envelope),
                        None => break,
                    }
                }
            }
            if !popped.is_empty() {
                state.read_batches += 1;
            }
            // The driver leaves the event signaled while the queue is
            // non-empty.
            let leftover = state
                .queues
                .get(&u64::from(handle))
                .map(|queue| !queue.is_empty())
                .unwrap_or(false);
            if leftover {
                if let Some(&raw) = state.packet_events.get(&u64::from(handle)) {
                    Self::signal_raw(raw);
                }
            }
        }

        for (slot, envelope) in request.slots_mut().zip(popped.iter()) {
            *slot = *envelope;
        }
        request.set_packet_success(popped.len() as u32);
        Ok(!popped.is_empty())
    }

    fn send_packets_to_adapter<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        self.wait_adapter_send_gate();
        let mut state = self.state.lock();
        for envelope in request.iter() {
            state.sent_to_adapter.push(*envelope);
        }
        Ok(())
    }

    fn send_packets_to_mstcp<const N: usize>(
        &self,
        request: &EtherMultiRequest<'_, N>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        for envelope in request.iter() {
            state.sent_to_stack.push(*envelope);
        }
        Ok(())
    }

    unsafe fn read_packets_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut state = self.state.lock();
        let mut filled = 0usize;
        for slot in packets.iter() {
            match state.unsorted_queue.pop_front() {
                Some(envelope) => {
                    ptr::write_unaligned(*slot, envelope);
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    unsafe fn send_packets_to_adapters_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut state = self.state.lock();
        for slot in packets.iter() {
            state.unsorted_to_adapter.push(ptr::read_unaligned(*slot));
        }
        Ok(packets.len())
    }

    unsafe fn send_packets_to_mstcp_unsorted(
        &self,
        packets: &mut [*mut IntermediateBuffer],
    ) -> Result<usize> {
        let mut state = self.state.lock();
        for slot in packets.iter() {
            state.unsorted_to_stack.push(ptr::read_unaligned(*slot));
        }
        Ok(packets.len())
    }

    unsafe fn initialize_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        _size_bytes: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.fastio_sections.clear();
        state.fastio_sections.push(section as usize);
        Ok(())
    }

    unsafe fn add_secondary_fast_io<const N: usize>(
        &self,
        section: *mut FastIoSection<N>,
        _size_bytes: u32,
    ) -> Result<()> {
        self.state.lock().fastio_sections.push(section as usize);
        Ok(())
    }

    fn set_packet_filter_table(&self, table: Option<&[u8]>) -> Result<()> {
        let mut state = self.state.lock();
        match table {
            None => state.filters.clear(),
            Some(bytes) => {
                if bytes.len() < size_of::<StaticFilterTable<0>>() {
                    return Err(Error::InvalidArgument);
                }
                let count = u32::from_ne_bytes(bytes[..4].try_into().unwrap()) as usize;
                if bytes.len()
                    < size_of::<StaticFilterTable<0>>() + count * size_of::<StaticFilter>()
                {
                    return Err(Error::InvalidArgument);
                }
                state.filters = (0..count)
                    .map(|index| {
                        let offset = size_of::<StaticFilterTable<0>>()
                            + index * size_of::<StaticFilter>();
                        unsafe {
                            ptr::read_unaligned(bytes.as_ptr().add(offset) as *const StaticFilter)
                        }
                    })
                    .collect();
            }
        }
        Ok(())
    }

    fn reset_packet_filter_table(&self) -> Result<()> {
        self.state.lock().filters.clear();
        Ok(())
    }

    fn packet_filter_table_size(&self) -> Result<usize> {
        let state = self.state.lock();
        if state.understate_size {
            Ok(0)
        } else {
            Ok(state.filters.len())
        }
    }

    fn read_packet_filter_table(&self, out: &mut [u8], reset_stats: bool) -> Result<()> {
        let state = self.state.lock();
        Self::table_bytes(&state, reset_stats, out)
    }

    fn add_filter_front(&self, filter: &StaticFilter) -> Result<()> {
        self.state.lock().filters.insert(0, *filter);
        Ok(())
    }

    fn add_filter_back(&self, filter: &StaticFilter) -> Result<()> {
        self.state.lock().filters.push(*filter);
        Ok(())
    }

    fn insert_filter(&self, filter: &StaticFilter, position: u32) -> Result<()> {
        let mut state = self.state.lock();
        if position as usize > state.filters.len() {
            return Err(Error::InvalidArgument);
        }
        state.filters.insert(position as usize, *filter);
        Ok(())
    }

    fn remove_filter(&self, position: u32) -> Result<()> {
        let mut state = self.state.lock();
        if position as usize >= state.filters.len() {
            return Err(Error::InvalidArgument);
        }
        state.filters.remove(position as usize);
        Ok(())
    }

    fn set_packet_filter_cache_state(&self, enabled: bool) -> Result<()> {
        self.state.lock().filter_cache = Some(enabled);
        Ok(())
    }

    fn set_packet_fragment_cache_state(&self, enabled: bool) -> Result<()> {
        self.state.lock().fragment_cache = Some(enabled);
        Ok(())
    }

    fn friendly_adapter_name(&self, internal_name: &str) -> String {
        internal_name.to_owned()
    }

    fn classify_wan_kind(&self, _internal_name: &str) -> NdisWanKind {
        NdisWanKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_queues_per_adapter() {
        let mock = MockDriver::new();
        let first = mock.add_adapter("a");
        let second = mock.add_adapter("b");

        mock.enqueue_packet(first, on_send_envelope(first, 60, 1));
        mock.enqueue_packet(second, on_send_envelope(second, 60, 2));

        let mut buffer = vec![IntermediateBuffer::default(); 4];
        let mut request = EtherMultiRequestMut::<4>::from_iter(first, buffer.iter_mut());
        assert!(mock.read_packets(&mut request).unwrap());
        assert_eq!(request.packet_success(), 1);
        drop(request);
        assert_eq!(buffer[0].data()[0], 1);
    }

    #[test]
    fn mock_serves_unsorted_reads_in_order() {
        let mock = MockDriver::new();
        let first = mock.add_adapter("a");
        let second = mock.add_adapter("b");

        mock.enqueue_unsorted(envelope_with(first, true, 60, 1));
        mock.enqueue_unsorted(envelope_with(second, false, 64, 2));
        mock.enqueue_unsorted(envelope_with(first, false, 68, 3));

        let mut buffers = vec![IntermediateBuffer::default(); 4];
        let mut pointers: Vec<*mut IntermediateBuffer> = buffers
            .iter_mut()
            .map(|envelope| envelope as *mut IntermediateBuffer)
            .collect();

        let read = unsafe { mock.read_packets_unsorted(&mut pointers).unwrap() };
        assert_eq!(read, 3);

        // Arrival order and per-envelope identity survive the copy.
        assert_eq!(buffers[0].data()[0], 1);
        assert_eq!(buffers[0].adapter_handle(), first);
        assert_eq!({ buffers[1].length }, 64);
        assert_eq!(buffers[1].adapter_handle(), second);
        assert_eq!(buffers[2].data()[0], 3);
        assert_eq!(buffers[2].adapter_handle(), first);

        // The queue is drained; a second read returns nothing.
        let read = unsafe { mock.read_packets_unsorted(&mut pointers).unwrap() };
        assert_eq!(read, 0);
    }

    #[test]
    fn mock_records_unsorted_sends() {
        let mock = MockDriver::new();
        let handle = mock.add_adapter("a");
        let mut envelope = envelope_with(handle, false, 60, 7);
        let mut pointers = [&mut envelope as *mut IntermediateBuffer];
        let sent = unsafe { mock.send_packets_to_mstcp_unsorted(&mut pointers).unwrap() };
        assert_eq!(sent, 1);
        assert_eq!(mock.unsorted_to_stack()[0].data()[0], 7);
    }
}
