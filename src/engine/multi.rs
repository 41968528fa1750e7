//! Pipelined multi-adapter engine with fast-I/O reads.
//!
//! The read stage drains up to four kernel-shared sections lock-free; the
//! write stages inject through the unsorted ioctls, each envelope addressed
//! by the adapter handle in its own header. One packet event is shared
//! across every filtered adapter, and an adapter-list-change monitor
//! re-enumerates and reconciles interception modes while the engine runs.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::Mutex;
use windows::Win32::System::Threading::INFINITE;

use super::pool::UnsortedPacketBlock;
use super::{
    dispatch, spawn_stage, DispatchTarget, FilterDecision, FilterState, RoutingClassifier,
    StateCell,
};
use crate::abi::{
    DirectionFlags, FastIoSection, FilterFlags, IntermediateBuffer, TcpAdapterList,
    FAST_IO_MAXIMUM_PACKET_BLOCK, MAXIMUM_BLOCK_NUM, UNSORTED_MAXIMUM_PACKET_BLOCK,
};
use crate::adapter::NetworkAdapter;
use crate::api::DriverIo;
use crate::engine::build_network_interfaces;
use crate::event::SafeEvent;
use crate::{AdapterHandle, Error, Result};

/// Number of shared sections the engine registers: one primary plus three
/// secondary. The driver supports at least this many.
pub const FAST_IO_SECTIONS: usize = 4;

/// Pinned, suitably aligned backing store for one shared section. The kernel
/// writes into the memory concurrently once registered, so all access goes
/// through the raw pointer and the header words are only touched atomically.
#[repr(C, align(8))]
pub(crate) struct SectionStorage<const N: usize>(UnsafeCell<FastIoSection<N>>);

unsafe impl<const N: usize> Send for SectionStorage<N> {}
unsafe impl<const N: usize> Sync for SectionStorage<N> {}

impl<const N: usize> SectionStorage<N> {
    /// Heap-allocates one zeroed section.
    pub(crate) fn new_boxed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout);
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr as *mut Self)
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut FastIoSection<N> {
        self.0.get()
    }
}

/// Drains one section into `sink` following the shared-memory protocol:
///
/// 1. observe the packed producer state; zero means nothing to do;
/// 2. advertise the drain through read-in-progress;
/// 3. copy the published envelopes in index order;
/// 4. wait out a write-in-progress producer, then pick up anything it
///    appended;
/// 5. clear the producer state, then read-in-progress.
///
/// Returns the number of envelopes copied. The producer state word is only
/// ever cleared as a whole; bit-level stores would race the kernel.
pub(crate) unsafe fn drain_section<const N: usize>(
    section: *mut FastIoSection<N>,
    sink: &mut Vec<IntermediateBuffer>,
) -> usize {
    let write_union =
        &*(std::ptr::addr_of_mut!((*section).fast_io_header.fast_io_write_union.join)
            as *const AtomicU32);
    let read_in_progress =
        &*(std::ptr::addr_of_mut!((*section).fast_io_header.read_in_progress_flag)
            as *const AtomicU32);

    if write_union.load(Ordering::Acquire) == 0 {
        return 0;
    }

    read_in_progress.store(1, Ordering::Release);

    let mut state = write_union.load(Ordering::Acquire);
    let mut count = (state & 0xffff) as usize;
    let packets = std::ptr::addr_of!((*section).fast_io_packets) as *const IntermediateBuffer;

    sink.extend_from_slice(std::slice::from_raw_parts(packets, count.min(N)));

    // The producer may still be copying the last envelope; wait it out and
    // pick up whatever it appended meanwhile.
    loop {
        state = write_union.load(Ordering::Acquire);
        if state >> 16 == 0 {
            break;
        }
        std::hint::spin_loop();
    }

    let final_count = ((state & 0xffff) as usize).min(N);
    if final_count > count {
        sink.extend_from_slice(std::slice::from_raw_parts(
            packets.add(count),
            final_count - count,
        ));
        count = final_count;
    }

    write_union.store(0, Ordering::Release);
    read_in_progress.store(0, Ordering::Release);

    count
}

struct Shared<D: DriverIo> {
    api: Arc<D>,
    state: StateCell,
    incoming: Option<Box<RoutingClassifier>>,
    outgoing: Option<Box<RoutingClassifier>>,
    interfaces: Mutex<Vec<Arc<NetworkAdapter<D>>>>,
    filtered_names: Mutex<Vec<String>>,
    packet_event: Arc<SafeEvent>,
    adapter_change_event: Arc<SafeEvent>,
    monitor_shutdown: AtomicBool,
}

impl<D: DriverIo> Shared<D> {
    fn classify(
        &self,
        handle: AdapterHandle,
        direction: DirectionFlags,
        envelope: &mut IntermediateBuffer,
    ) -> (FilterDecision, Option<AdapterHandle>) {
        let classifier = if direction.contains(DirectionFlags::PACKET_FLAG_ON_SEND) {
            self.outgoing.as_ref()
        } else {
            self.incoming.as_ref()
        };
        classifier
            .map(|classify| classify(handle, envelope))
            .unwrap_or((FilterDecision::Pass, None))
    }

    fn tunnel_mode(&self) -> FilterFlags {
        let mut mode = FilterFlags::default();
        if self.outgoing.is_some() {
            mode |= FilterFlags::MSTCP_FLAG_SENT_TUNNEL;
        }
        if self.incoming.is_some() {
            mode |= FilterFlags::MSTCP_FLAG_RECV_TUNNEL;
        }
        mode
    }

    /// Applies the filtered-name set to every known adapter: matched
    /// adapters tunnel and signal the shared event, everything else is
    /// restored to mode zero with the event unbound.
    fn reconcile_modes(&self) {
        let interfaces = self.interfaces.lock();
        let filtered = self.filtered_names.lock();
        let running = self.state.is_running();

        for adapter in interfaces.iter() {
            let matched = running && filtered.iter().any(|name| name == adapter.name());
            if matched {
                let _ = adapter.set_mode(self.tunnel_mode());
                let _ = adapter.bind_packet_event();
            } else {
                let _ = adapter.unbind_packet_event();
                let _ = adapter.set_mode(FilterFlags::default());
            }
        }
    }

    /// Re-enumerates adapters after a list-change notification, rebuilding
    /// the facades around the shared packet event.
    fn rebuild_interfaces(&self) -> Result<()> {
        let adapters = self.api.tcpip_bound_adapters()?;
        let rebuilt =
            build_network_interfaces(&self.api, &adapters, Some(&self.packet_event))?;
        *self.interfaces.lock() = rebuilt;
        Ok(())
    }

    fn on_adapter_change(&self) {
        debug!("adapter list change notification");
        if let Err(error) = self.rebuild_interfaces() {
            error!("adapter re-enumeration failed: {error}");
            return;
        }
        self.reconcile_modes();
    }
}

fn monitor_loop<D: DriverIo>(shared: Arc<Shared<D>>) {
    loop {
        if shared.monitor_shutdown.load(Ordering::Acquire) {
            return;
        }
        if shared.adapter_change_event.wait(INFINITE).is_err() {
            return;
        }
        let _ = shared.adapter_change_event.reset();
        if shared.monitor_shutdown.load(Ordering::Acquire) {
            return;
        }
        shared.on_adapter_change();
    }
}

/// Multi-adapter engine over the fast-I/O and unsorted paths.
pub struct FastIoPacketFilter<D: DriverIo> {
    shared: Arc<Shared<D>>,
    sections: Vec<Arc<SectionStorage<FAST_IO_MAXIMUM_PACKET_BLOCK>>>,
    fastio_registered: bool,
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

impl<D: DriverIo> FastIoPacketFilter<D> {
    /// Builds the engine, registers the adapter-list-change event and spawns
    /// the reconcile monitor. Classifiers return a decision plus an optional
    /// adapter override applied to the envelope before injection.
    pub fn new(
        api: Arc<D>,
        adapters: &TcpAdapterList,
        incoming: Option<Box<RoutingClassifier>>,
        outgoing: Option<Box<RoutingClassifier>>,
    ) -> Result<Self> {
        let packet_event = Arc::new(SafeEvent::new(true, false)?);
        let adapter_change_event = Arc::new(SafeEvent::new(true, false)?);

        api.set_adapter_list_change_event(adapter_change_event.handle())?;

        let interfaces = build_network_interfaces(&api, adapters, Some(&packet_event))?;

        let shared = Arc::new(Shared {
            api,
            state: StateCell::new(FilterState::Stopped),
            incoming,
            outgoing,
            interfaces: Mutex::new(interfaces),
            filtered_names: Mutex::new(Vec::new()),
            packet_event,
            adapter_change_event,
            monitor_shutdown: AtomicBool::new(false),
        });

        let monitor = spawn_stage("adapter-monitor", {
            let shared = shared.clone();
            move || monitor_loop(shared)
        })?;

        Ok(Self {
            shared,
            sections: Vec::new(),
            fastio_registered: false,
            workers: Vec::new(),
            monitor: Some(monitor),
            shutdown: None,
        })
    }

    /// The adapters currently known to the engine.
    pub fn interfaces(&self) -> Vec<Arc<NetworkAdapter<D>>> {
        self.shared.interfaces.lock().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FilterState {
        self.shared.state.load()
    }

    /// Adds `name` to the filtered set and reconciles adapter modes.
    pub fn filter_adapter(&self, name: &str) {
        {
            let mut filtered = self.shared.filtered_names.lock();
            if !filtered.iter().any(|existing| existing == name) {
                filtered.push(name.to_owned());
            }
        }
        self.shared.reconcile_modes();
    }

    /// Removes `name` from the filtered set and reconciles adapter modes.
    pub fn unfilter_adapter(&self, name: &str) {
        self.shared
            .filtered_names
            .lock()
            .retain(|existing| existing != name);
        self.shared.reconcile_modes();
    }

    /// The filtered-name set.
    pub fn filtered_adapters(&self) -> Vec<String> {
        self.shared.filtered_names.lock().clone()
    }

    /// Re-enumerates adapters. Allowed only while stopped.
    pub fn reconfigure(&mut self) -> Result<()> {
        if self.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }
        self.shared.rebuild_interfaces()
    }

    /// Starts the pipeline across every adapter in the filtered set (all
    /// adapters when the set is empty).
    pub fn start(&mut self) -> Result<()> {
        if self.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }
        self.shared.state.store(FilterState::Starting);

        if let Err(error) = self.register_fast_io() {
            self.shared.state.store(FilterState::Stopped);
            return Err(error);
        }

        {
            let interfaces = self.shared.interfaces.lock();
            let mut filtered = self.shared.filtered_names.lock();
            if filtered.is_empty() {
                *filtered = interfaces
                    .iter()
                    .map(|adapter| adapter.name().to_owned())
                    .collect();
            }
        }

        let (read_tx, read_rx) = bounded::<UnsortedPacketBlock>(MAXIMUM_BLOCK_NUM);
        let (process_tx, process_rx) = bounded::<UnsortedPacketBlock>(MAXIMUM_BLOCK_NUM);
        let (stack_tx, stack_rx) = bounded::<UnsortedPacketBlock>(MAXIMUM_BLOCK_NUM);
        let (adapter_tx, adapter_rx) = bounded::<UnsortedPacketBlock>(MAXIMUM_BLOCK_NUM);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        for _ in 0..MAXIMUM_BLOCK_NUM {
            read_tx
                .send(UnsortedPacketBlock::new())
                .expect("fresh channel holds the whole pool");
        }

        self.shared.state.store(FilterState::Running);

        let spawned = (|| -> Result<()> {
            self.workers.push(spawn_stage("fastio-read", {
                let shared = self.shared.clone();
                let sections = self.sections.clone();
                let shutdown = shutdown_rx.clone();
                move || read_stage(shared, sections, read_rx, process_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("fastio-process", {
                let shared = self.shared.clone();
                let shutdown = shutdown_rx.clone();
                move || process_stage(shared, process_rx, stack_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("fastio-write-stack", {
                let shared = self.shared.clone();
                let shutdown = shutdown_rx.clone();
                move || write_stack_stage(shared, stack_rx, adapter_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("fastio-write-adapter", {
                let shared = self.shared.clone();
                move || write_adapter_stage(shared, adapter_rx, read_tx, shutdown_rx)
            })?);
            Ok(())
        })();

        if let Err(error) = spawned {
            // Unwind the stages that did start before reporting the failure.
            self.shared.state.store(FilterState::Stopping);
            let _ = self.shared.packet_event.signal();
            drop(shutdown_tx);
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            self.shared.state.store(FilterState::Stopped);
            return Err(error);
        }

        self.shutdown = Some(shutdown_tx);
        self.shared.reconcile_modes();
        Ok(())
    }

    fn register_fast_io(&mut self) -> Result<()> {
        if self.fastio_registered {
            return Ok(());
        }
        if self.sections.is_empty() {
            self.sections = (0..FAST_IO_SECTIONS)
                .map(|_| Arc::from(SectionStorage::new_boxed()))
                .collect();
        }

        let size =
            std::mem::size_of::<FastIoSection<FAST_IO_MAXIMUM_PACKET_BLOCK>>() as u32;
        unsafe {
            self.shared
                .api
                .initialize_fast_io(self.sections[0].as_ptr(), size)?;
            for section in &self.sections[1..] {
                self.shared.api.add_secondary_fast_io(section.as_ptr(), size)?;
            }
        }
        self.fastio_registered = true;
        Ok(())
    }

    /// Stops the pipeline: wakes the monitor and every stage, restores each
    /// adapter and joins the workers. A second call reports
    /// [`Error::NotRunning`].
    pub fn stop(&mut self) -> Result<()> {
        if self.state() != FilterState::Running {
            return Err(Error::NotRunning);
        }
        self.shared.state.store(FilterState::Stopping);

        let _ = self.shared.adapter_change_event.signal();
        let _ = self.shared.packet_event.signal();

        for adapter in self.shared.interfaces.lock().iter() {
            adapter.close();
        }

        self.shutdown.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        self.shared.state.store(FilterState::Stopped);
        Ok(())
    }
}

impl<D: DriverIo> Drop for FastIoPacketFilter<D> {
    fn drop(&mut self) {
        let _ = self.stop();
        self.shared
            .monitor_shutdown
            .store(true, Ordering::Release);
        let _ = self.shared.adapter_change_event.signal();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

/// Drains every section into a block; parks on the shared packet event when
/// a full pass finds nothing.
fn read_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    sections: Vec<Arc<SectionStorage<FAST_IO_MAXIMUM_PACKET_BLOCK>>>,
    blocks: Receiver<UnsortedPacketBlock>,
    next: Sender<UnsortedPacketBlock>,
    shutdown: Receiver<()>,
) {
    loop {
        let mut block = crossbeam_channel::select! {
            recv(blocks) -> block => match block {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };
        block.reset();

        loop {
            if !shared.state.is_running() {
                return;
            }

            let mut total = 0usize;
            for section in &sections {
                total += unsafe { drain_section(section.as_ptr(), &mut block.buffer) };
            }
            if total > 0 {
                break;
            }

            if shared.packet_event.wait(INFINITE).is_err() {
                shared.state.store(FilterState::Stopping);
                return;
            }
            let _ = shared.packet_event.reset();
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Classifies each envelope against its originating adapter and applies any
/// cross-adapter override before queueing it for injection.
fn process_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    input: Receiver<UnsortedPacketBlock>,
    next: Sender<UnsortedPacketBlock>,
    shutdown: Receiver<()>,
) {
    loop {
        let mut block = crossbeam_channel::select! {
            recv(input) -> block => match block {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };

        for index in 0..block.buffer.len() {
            let envelope = &mut block.buffer[index];
            let origin = envelope.adapter_handle();
            let direction = envelope.direction();
            let (decision, target) = shared.classify(origin, direction, envelope);
            if let Some(target) = target {
                envelope.set_adapter_handle(target);
            }
            match dispatch(direction, decision) {
                DispatchTarget::ToAdapter => block.to_adapter.push(index as u32),
                DispatchTarget::ToStack => block.to_stack.push(index as u32),
                DispatchTarget::Discard => {}
            }
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Injects a block's stack-bound envelopes through the unsorted path, in
/// request-sized chunks, retrying short sends with the tail.
fn write_stack_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    input: Receiver<UnsortedPacketBlock>,
    next: Sender<UnsortedPacketBlock>,
    shutdown: Receiver<()>,
) {
    loop {
        let mut block = crossbeam_channel::select! {
            recv(input) -> block => match block {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };

        if !block.to_stack.is_empty() {
            let base = block.buffer.as_mut_ptr();
            let mut pointers: Vec<*mut IntermediateBuffer> = block
                .to_stack
                .iter()
                .map(|&index| unsafe { base.add(index as usize) })
                .collect();
            send_unsorted(&shared, &mut pointers, UnsortedTarget::Stack);
            block.to_stack.clear();
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Injects a block's adapter-bound envelopes and returns the block to the
/// read stage.
fn write_adapter_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    input: Receiver<UnsortedPacketBlock>,
    back_to_read: Sender<UnsortedPacketBlock>,
    shutdown: Receiver<()>,
) {
    loop {
        let mut block = crossbeam_channel::select! {
            recv(input) -> block => match block {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };

        if !block.to_adapter.is_empty() {
            let base = block.buffer.as_mut_ptr();
            let mut pointers: Vec<*mut IntermediateBuffer> = block
                .to_adapter
                .iter()
                .map(|&index| unsafe { base.add(index as usize) })
                .collect();
            send_unsorted(&shared, &mut pointers, UnsortedTarget::Adapter);
            block.to_adapter.clear();
        }

        if back_to_read.send(block).is_err() {
            return;
        }
    }
}

#[derive(Clone, Copy)]
enum UnsortedTarget {
    Adapter,
    Stack,
}

fn send_unsorted<D: DriverIo>(
    shared: &Shared<D>,
    pointers: &mut [*mut IntermediateBuffer],
    target: UnsortedTarget,
) {
    for chunk in pointers.chunks_mut(UNSORTED_MAXIMUM_PACKET_BLOCK) {
        let mut offset = 0usize;
        while offset < chunk.len() && shared.state.is_running() {
            let result = unsafe {
                match target {
                    UnsortedTarget::Adapter => shared
                        .api
                        .send_packets_to_adapters_unsorted(&mut chunk[offset..]),
                    UnsortedTarget::Stack => shared
                        .api
                        .send_packets_to_mstcp_unsorted(&mut chunk[offset..]),
                }
            };
            match result {
                Ok(0) => {
                    warn!("unsorted send made no progress, dropping {} envelopes", chunk.len() - offset);
                    break;
                }
                Ok(sent) => offset += sent,
                Err(error) => {
                    warn!("unsorted send failed: {error}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::FastIoWriteState;
    use crate::testing::{envelope_with, wait_until, MockDriver};
    use std::time::Duration;

    type TestSection = FastIoSection<8>;

    fn publish<const N: usize>(
        storage: &SectionStorage<N>,
        envelopes: &[IntermediateBuffer],
        write_in_progress: bool,
    ) {
        unsafe {
            let section = storage.as_ptr();
            let packets =
                std::ptr::addr_of_mut!((*section).fast_io_packets) as *mut IntermediateBuffer;
            for (index, envelope) in envelopes.iter().enumerate() {
                std::ptr::write_unaligned(packets.add(index), *envelope);
            }
            let join = std::ptr::addr_of_mut!(
                (*section).fast_io_header.fast_io_write_union.join
            ) as *const AtomicU32;
            let word =
                envelopes.len() as u32 | if write_in_progress { 1 << 16 } else { 0 };
            (*join).store(word, Ordering::Release);
        }
    }

    fn section_state<const N: usize>(storage: &SectionStorage<N>) -> (u32, u32) {
        unsafe {
            let section = storage.as_ptr();
            let join = std::ptr::addr_of_mut!(
                (*section).fast_io_header.fast_io_write_union.join
            ) as *const AtomicU32;
            let rip = std::ptr::addr_of_mut!((*section).fast_io_header.read_in_progress_flag)
                as *const AtomicU32;
            ((*join).load(Ordering::Acquire), (*rip).load(Ordering::Acquire))
        }
    }

    #[test]
    fn drain_returns_published_sequence_once() {
        let storage = SectionStorage::<8>::new_boxed();
        let envelopes: Vec<_> = (0..3u8)
            .map(|seq| envelope_with(AdapterHandle::from(1), false, 60, seq))
            .collect();
        publish(&storage, &envelopes, false);

        let mut sink = Vec::new();
        let count = unsafe { drain_section(storage.as_ptr(), &mut sink) };
        assert_eq!(count, 3);
        let order: Vec<u8> = sink.iter().map(|envelope| envelope.data()[0]).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(section_state(&storage), (0, 0));

        // Nothing is read twice.
        let count = unsafe { drain_section(storage.as_ptr(), &mut sink) };
        assert_eq!(count, 0);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn drain_waits_out_write_in_progress() {
        let storage = SectionStorage::<8>::new_boxed();
        let envelopes: Vec<_> = (0..2u8)
            .map(|seq| envelope_with(AdapterHandle::from(1), false, 60, seq))
            .collect();
        publish(&storage, &envelopes, true);

        let section_addr = storage.as_ptr() as usize;
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            unsafe {
                let section = section_addr as *mut TestSection;
                // Append two more envelopes, then clear the in-progress flag
                // with the final count.
                let packets = std::ptr::addr_of_mut!((*section).fast_io_packets)
                    as *mut IntermediateBuffer;
                for seq in 2..4u8 {
                    std::ptr::write_unaligned(
                        packets.add(seq as usize),
                        envelope_with(AdapterHandle::from(1), false, 60, seq),
                    );
                }
                let join = std::ptr::addr_of_mut!(
                    (*section).fast_io_header.fast_io_write_union.join
                ) as *const AtomicU32;
                (*join).store(4, Ordering::Release);
            }
        });

        let mut sink = Vec::new();
        let count = unsafe { drain_section(storage.as_ptr(), &mut sink) };
        producer.join().unwrap();

        assert_eq!(count, 4);
        let order: Vec<u8> = sink.iter().map(|envelope| envelope.data()[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(section_state(&storage), (0, 0));
    }

    #[test]
    fn two_section_drain_preserves_per_section_order() {
        let first = SectionStorage::<8>::new_boxed();
        let second = SectionStorage::<8>::new_boxed();

        let batch_a: Vec<_> = (0..5u8)
            .map(|seq| envelope_with(AdapterHandle::from(1), false, 60, seq))
            .collect();
        let batch_b: Vec<_> = (10..13u8)
            .map(|seq| envelope_with(AdapterHandle::from(2), false, 60, seq))
            .collect();
        publish(&first, &batch_a, false);
        publish(&second, &batch_b, true);

        let second_addr = second.as_ptr() as usize;
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            unsafe {
                let section = second_addr as *mut TestSection;
                let join = std::ptr::addr_of_mut!(
                    (*section).fast_io_header.fast_io_write_union.join
                ) as *const AtomicU32;
                (*join).store(3, Ordering::Release);
            }
        });

        let mut sink = Vec::new();
        let total = unsafe {
            drain_section(first.as_ptr(), &mut sink) + drain_section(second.as_ptr(), &mut sink)
        };
        producer.join().unwrap();

        assert_eq!(total, 8);
        let order: Vec<u8> = sink.iter().map(|envelope| envelope.data()[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 10, 11, 12]);
        assert_eq!(section_state(&first), (0, 0));
        assert_eq!(section_state(&second), (0, 0));
    }

    #[test]
    fn write_union_split_matches_drain_view() {
        // The low half carries the count, the high half the in-progress flag.
        let mut word = crate::abi::FastIoWriteUnion::default();
        word.split = FastIoWriteState {
            number_of_packets: 7,
            write_in_progress_flag: 1,
        };
        assert_eq!(unsafe { word.join }, 7 | 1 << 16);
    }

    fn engine_with_two_adapters(
        incoming: Option<Box<RoutingClassifier>>,
    ) -> (
        Arc<MockDriver>,
        FastIoPacketFilter<MockDriver>,
        AdapterHandle,
        AdapterHandle,
    ) {
        let api = Arc::new(MockDriver::new());
        let first = api.add_adapter("\\DEVICE\\{MULTI-0}");
        let second = api.add_adapter("\\DEVICE\\{MULTI-1}");
        let adapters = api.tcpip_bound_adapters().unwrap();
        let engine = FastIoPacketFilter::new(api.clone(), &adapters, incoming, None).unwrap();
        (api, engine, first, second)
    }

    #[test]
    fn cross_adapter_redirect_rewrites_origin() {
        let api = Arc::new(MockDriver::new());
        let first = api.add_adapter("\\DEVICE\\{MULTI-0}");
        let second = api.add_adapter("\\DEVICE\\{MULTI-1}");

        let incoming: Box<RoutingClassifier> = Box::new(move |origin, _| {
            if origin == first {
                (FilterDecision::Redirect, Some(second))
            } else {
                (FilterDecision::Pass, None)
            }
        });

        let adapters = api.tcpip_bound_adapters().unwrap();
        let mut engine =
            FastIoPacketFilter::new(api.clone(), &adapters, Some(incoming), None).unwrap();
        engine.start().unwrap();

        // One frame received on the first adapter; redirect swaps it onto
        // the adapter path with the second adapter's handle.
        api.publish_fast_io(0, &[envelope_with(first, false, 60, 0x5a)]);
        api.signal_packet_events();

        assert!(wait_until(|| api.unsorted_to_adapter().len() == 1));
        let injected = api.unsorted_to_adapter();
        assert_eq!(injected[0].adapter_handle(), second);
        assert!(api.unsorted_to_stack().is_empty());

        engine.stop().unwrap();
    }

    #[test]
    fn unfiltering_an_adapter_restores_it() {
        let incoming: Box<RoutingClassifier> =
            Box::new(|_, _| (FilterDecision::Pass, None));
        let (api, mut engine, first, second) = engine_with_two_adapters(Some(incoming));
        engine.start().unwrap();

        assert_eq!(
            api.adapter_mode(first).unwrap(),
            FilterFlags::MSTCP_FLAG_RECV_TUNNEL
        );

        engine.unfilter_adapter("\\DEVICE\\{MULTI-0}");
        assert_eq!(api.adapter_mode(first).unwrap(), FilterFlags::default());
        assert!(!api.has_packet_event(first));

        // The second adapter keeps flowing.
        api.publish_fast_io(1, &[envelope_with(second, false, 60, 1)]);
        api.signal_packet_events();
        assert!(wait_until(|| api.unsorted_to_stack().len() == 1));

        engine.stop().unwrap();
    }

    #[test]
    fn adapter_change_reenumerates_without_losing_traffic() {
        let incoming: Box<RoutingClassifier> =
            Box::new(|_, _| (FilterDecision::Pass, None));
        let (api, mut engine, first, second) = engine_with_two_adapters(Some(incoming));
        engine.start().unwrap();
        assert_eq!(engine.interfaces().len(), 2);

        // The first adapter disappears from the system.
        api.remove_adapter(first);
        api.trigger_adapter_change();
        assert!(wait_until(|| engine.interfaces().len() == 1));

        // The remaining adapter continues filtering.
        api.publish_fast_io(2, &[envelope_with(second, false, 60, 9)]);
        api.signal_packet_events();
        assert!(wait_until(|| api.unsorted_to_stack().len() == 1));

        engine.stop().unwrap();
        assert_eq!(engine.stop().unwrap_err(), Error::NotRunning);
    }

    #[test]
    fn start_registers_four_sections() {
        let incoming: Box<RoutingClassifier> =
            Box::new(|_, _| (FilterDecision::Pass, None));
        let (api, mut engine, _, _) = engine_with_two_adapters(Some(incoming));
        engine.start().unwrap();
        assert_eq!(api.fast_io_section_count(), FAST_IO_SECTIONS);
        engine.stop().unwrap();

        // Sections survive a restart without re-registration.
        engine.start().unwrap();
        assert_eq!(api.fast_io_section_count(), FAST_IO_SECTIONS);
        engine.stop().unwrap();
    }
}
