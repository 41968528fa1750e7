//! Blocking single-adapter engine: one worker, wait → read → classify →
//! dispatch.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::error;
use windows::Win32::System::Threading::INFINITE;

use super::{dispatch, DispatchTarget, FilterDecision, FilterState, PacketClassifier, StateCell};
use crate::abi::{
    DirectionFlags, EtherMultiRequest, EtherMultiRequestMut, FilterFlags, IntermediateBuffer,
    TcpAdapterList, MAXIMUM_PACKET_BLOCK,
};
use crate::adapter::NetworkAdapter;
use crate::api::DriverIo;
use crate::engine::build_network_interfaces;
use crate::{AdapterHandle, Error, Result};

struct Shared<D: DriverIo> {
    api: Arc<D>,
    state: StateCell,
    incoming: Option<Box<PacketClassifier>>,
    outgoing: Option<Box<PacketClassifier>>,
}

impl<D: DriverIo> Shared<D> {
    fn classify(
        &self,
        handle: AdapterHandle,
        direction: DirectionFlags,
        envelope: &mut IntermediateBuffer,
    ) -> FilterDecision {
        let classifier = if direction.contains(DirectionFlags::PACKET_FLAG_ON_SEND) {
            self.outgoing.as_ref()
        } else {
            self.incoming.as_ref()
        };
        classifier
            .map(|classify| classify(handle, envelope))
            .unwrap_or(FilterDecision::Pass)
    }

    /// Classifies `count` freshly read envelopes and flushes both write
    /// queues. Per-direction arrival order is preserved: envelopes are
    /// appended to each queue in read order.
    fn process_batch(
        &self,
        adapter: &NetworkAdapter<D>,
        buffer: &mut [IntermediateBuffer],
        count: usize,
    ) -> Result<()> {
        let mut to_adapter: Vec<u16> = Vec::new();
        let mut to_stack: Vec<u16> = Vec::new();

        for index in 0..count {
            let envelope = &mut buffer[index];
            let direction = envelope.direction();
            let decision = self.classify(adapter.handle(), direction, envelope);
            match dispatch(direction, decision) {
                DispatchTarget::ToAdapter => to_adapter.push(index as u16),
                DispatchTarget::ToStack => to_stack.push(index as u16),
                DispatchTarget::Discard => {}
            }
        }

        if !to_adapter.is_empty() {
            let request = EtherMultiRequest::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                to_adapter.iter().map(|&index| &buffer[index as usize]),
            );
            self.api.send_packets_to_adapter(&request)?;
        }

        if !to_stack.is_empty() {
            let request = EtherMultiRequest::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                to_stack.iter().map(|&index| &buffer[index as usize]),
            );
            self.api.send_packets_to_mstcp(&request)?;
        }

        Ok(())
    }
}

/// The simplest engine: a single worker thread serving one adapter.
pub struct BlockingPacketFilter<D: DriverIo> {
    shared: Arc<Shared<D>>,
    interfaces: Vec<Arc<NetworkAdapter<D>>>,
    active: Option<Arc<NetworkAdapter<D>>>,
    worker: Option<JoinHandle<()>>,
}

impl<D: DriverIo> BlockingPacketFilter<D> {
    /// Builds the engine over `adapters`. `incoming` / `outgoing` classify
    /// frames captured on receive and send respectively; a missing classifier
    /// passes that direction through.
    pub fn new(
        api: Arc<D>,
        adapters: &TcpAdapterList,
        incoming: Option<Box<PacketClassifier>>,
        outgoing: Option<Box<PacketClassifier>>,
    ) -> Result<Self> {
        let interfaces = build_network_interfaces(&api, adapters, None)?;

        Ok(Self {
            shared: Arc::new(Shared {
                api,
                state: StateCell::new(FilterState::Stopped),
                incoming,
                outgoing,
            }),
            interfaces,
            active: None,
            worker: None,
        })
    }

    /// The adapters the engine can be started on.
    pub fn interfaces(&self) -> &[Arc<NetworkAdapter<D>>] {
        &self.interfaces
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FilterState {
        self.shared.state.load()
    }

    /// Re-enumerates adapters. Allowed only while stopped.
    pub fn reconfigure(&mut self) -> Result<()> {
        if self.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }
        let adapters = self.shared.api.tcpip_bound_adapters()?;
        self.interfaces = build_network_interfaces(&self.shared.api, &adapters, None)?;
        Ok(())
    }

    /// Starts filtering `adapter_index`: binds the packet event, tunnels both
    /// directions and launches the worker.
    pub fn start(&mut self, adapter_index: usize) -> Result<()> {
        if self.state() != FilterState::Stopped {
            return Err(Error::NotStopped);
        }
        let adapter = self
            .interfaces
            .get(adapter_index)
            .cloned()
            .ok_or(Error::AdapterOutOfRange(adapter_index))?;

        self.shared.state.store(FilterState::Starting);

        if let Err(error) = self.init_adapter(&adapter) {
            self.shared.state.store(FilterState::Stopped);
            return Err(error);
        }

        self.active = Some(adapter.clone());
        self.shared.state.store(FilterState::Running);

        let shared = self.shared.clone();
        self.worker = Some(std::thread::spawn(move || worker_loop(shared, adapter)));

        Ok(())
    }

    fn init_adapter(&self, adapter: &NetworkAdapter<D>) -> Result<()> {
        adapter.bind_packet_event()?;
        adapter.set_mode(FilterFlags::MSTCP_FLAG_SENT_RECEIVE_TUNNEL)
    }

    /// Stops the worker, releases the adapter and returns to `Stopped`.
    /// A second call reports [`Error::NotRunning`].
    pub fn stop(&mut self) -> Result<()> {
        if self.state() != FilterState::Running {
            return Err(Error::NotRunning);
        }
        self.shared.state.store(FilterState::Stopping);

        if let Some(adapter) = &self.active {
            let _ = adapter.signal_event();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(adapter) = self.active.take() {
            adapter.close();
        }

        self.shared.state.store(FilterState::Stopped);
        Ok(())
    }
}

impl<D: DriverIo> Drop for BlockingPacketFilter<D> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn worker_loop<D: DriverIo>(shared: Arc<Shared<D>>, adapter: Arc<NetworkAdapter<D>>) {
    let mut buffer =
        vec![IntermediateBuffer::default(); MAXIMUM_PACKET_BLOCK].into_boxed_slice();

    while shared.state.is_running() {
        if adapter.wait_event(INFINITE).is_err() {
            break;
        }
        let _ = adapter.reset_event();

        while shared.state.is_running() {
            let mut request = EtherMultiRequestMut::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                buffer.iter_mut(),
            );
            match shared.api.read_packets(&mut request) {
                Ok(true) => {
                    let count = request.packet_success() as usize;
                    drop(request);
                    if let Err(error) = shared.process_batch(&adapter, &mut buffer, count) {
                        error!("packet dispatch failed, stopping worker: {error}");
                        shared.state.store(FilterState::Stopping);
                        return;
                    }
                }
                Ok(false) => break,
                Err(error) => {
                    error!("packet read failed, stopping worker: {error}");
                    shared.state.store(FilterState::Stopping);
                    return;
                }
            }
        }
    }
}
