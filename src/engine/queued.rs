//! Pipelined single-adapter engine.
//!
//! Four stages — read, process, write-to-stack, write-to-adapter — pass a
//! fixed pool of reusable packet blocks around bounded channels. The pool
//! size is
//! the backpressure bound: when every block is held downstream, the read
//! stage blocks on the block channel and stops issuing reads.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, warn};
use windows::Win32::System::Threading::INFINITE;

use super::pool::PacketBlock;
use super::{
    dispatch, spawn_stage, DispatchTarget, FilterDecision, FilterState, PacketClassifier,
    StateCell,
};
use crate::abi::{
    DirectionFlags, EtherMultiRequest, EtherMultiRequestMut, FilterFlags, IntermediateBuffer,
    TcpAdapterList, MAXIMUM_BLOCK_NUM, MAXIMUM_PACKET_BLOCK,
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

    /// The interception mode is masked by which classifiers exist: a missing
    /// classifier leaves that direction untouched in the kernel.
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
}

/// Pipelined engine for one adapter.
pub struct QueuedPacketFilter<D: DriverIo> {
    shared: Arc<Shared<D>>,
    interfaces: Vec<Arc<NetworkAdapter<D>>>,
    active: Option<Arc<NetworkAdapter<D>>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
}

impl<D: DriverIo> QueuedPacketFilter<D> {
    /// Builds the engine over `adapters` with the given classifiers.
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
            workers: Vec::new(),
            shutdown: None,
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

    /// Starts the four-stage pipeline on `adapter_index`.
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

        if let Err(error) = adapter
            .bind_packet_event()
            .and_then(|_| adapter.set_mode(self.shared.tunnel_mode()))
        {
            self.shared.state.store(FilterState::Stopped);
            return Err(error);
        }

        // One channel per hop; the block pool circulates through all four.
        let (read_tx, read_rx) = bounded::<PacketBlock>(MAXIMUM_BLOCK_NUM);
        let (process_tx, process_rx) = bounded::<PacketBlock>(MAXIMUM_BLOCK_NUM);
        let (stack_tx, stack_rx) = bounded::<PacketBlock>(MAXIMUM_BLOCK_NUM);
        let (adapter_tx, adapter_rx) = bounded::<PacketBlock>(MAXIMUM_BLOCK_NUM);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        for _ in 0..MAXIMUM_BLOCK_NUM {
            read_tx
                .send(PacketBlock::new())
                .expect("fresh channel holds the whole pool");
        }

        self.active = Some(adapter.clone());
        self.shared.state.store(FilterState::Running);

        let spawned = (|| -> Result<()> {
            self.workers.push(spawn_stage("pkt-read", {
                let shared = self.shared.clone();
                let adapter = adapter.clone();
                let shutdown = shutdown_rx.clone();
                move || read_stage(shared, adapter, read_rx, process_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("pkt-process", {
                let shared = self.shared.clone();
                let adapter = adapter.clone();
                let shutdown = shutdown_rx.clone();
                move || process_stage(shared, adapter, process_rx, stack_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("pkt-write-stack", {
                let shared = self.shared.clone();
                let adapter = adapter.clone();
                let shutdown = shutdown_rx.clone();
                move || write_stack_stage(shared, adapter, stack_rx, adapter_tx, shutdown)
            })?);
            self.workers.push(spawn_stage("pkt-write-adapter", {
                let shared = self.shared.clone();
                let adapter = adapter.clone();
                move || write_adapter_stage(shared, adapter, adapter_rx, read_tx, shutdown_rx)
            })?);
            Ok(())
        })();

        if let Err(error) = spawned {
            // Unwind the stages that did start: wake them, disconnect the
            // shutdown channel and restore the adapter.
            self.shared.state.store(FilterState::Stopping);
            let _ = adapter.signal_event();
            drop(shutdown_tx);
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            adapter.close();
            self.active = None;
            self.shared.state.store(FilterState::Stopped);
            return Err(error);
        }

        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    /// Stops the pipeline: unblocks every stage, joins the workers and
    /// releases the adapter. A second call reports [`Error::NotRunning`].
    pub fn stop(&mut self) -> Result<()> {
        if self.state() != FilterState::Running {
            return Err(Error::NotRunning);
        }
        self.shared.state.store(FilterState::Stopping);

        if let Some(adapter) = &self.active {
            let _ = adapter.signal_event();
        }
        // Dropping the sender disconnects every stage's shutdown receiver.
        self.shutdown.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(adapter) = self.active.take() {
            adapter.close();
        }

        self.shared.state.store(FilterState::Stopped);
        Ok(())
    }
}

impl<D: DriverIo> Drop for QueuedPacketFilter<D> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Receives an idle block, waits for traffic, reads one batch into the block
/// and forwards it.
fn read_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    adapter: Arc<NetworkAdapter<D>>,
    blocks: Receiver<PacketBlock>,
    next: Sender<PacketBlock>,
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
            if adapter.wait_event(INFINITE).is_err() {
                shared.state.store(FilterState::Stopping);
                return;
            }
            let _ = adapter.reset_event();
            if !shared.state.is_running() {
                return;
            }

            let mut request = EtherMultiRequestMut::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                block.buffer.iter_mut(),
            );
            match shared.api.read_packets(&mut request) {
                Ok(true) => {
                    block.read_count = request.packet_success() as usize;
                    break;
                }
                Ok(false) => continue,
                Err(error) => {
                    error!("packet read failed, stopping pipeline: {error}");
                    shared.state.store(FilterState::Stopping);
                    return;
                }
            }
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Classifies every envelope of a block and fills its dispatch lists.
fn process_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    adapter: Arc<NetworkAdapter<D>>,
    input: Receiver<PacketBlock>,
    next: Sender<PacketBlock>,
    shutdown: Receiver<()>,
) {
    let handle = adapter.handle();
    loop {
        let mut block = crossbeam_channel::select! {
            recv(input) -> block => match block {
                Ok(block) => block,
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        };

        for index in 0..block.read_count {
            let envelope = &mut block.buffer[index];
            let direction = envelope.direction();
            let decision = shared.classify(handle, direction, envelope);
            match dispatch(direction, decision) {
                DispatchTarget::ToAdapter => block.to_adapter.push(index as u16),
                DispatchTarget::ToStack => block.to_stack.push(index as u16),
                DispatchTarget::Discard => {}
            }
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Flushes a block's write-to-stack list and forwards the block.
fn write_stack_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    adapter: Arc<NetworkAdapter<D>>,
    input: Receiver<PacketBlock>,
    next: Sender<PacketBlock>,
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
            let request = EtherMultiRequest::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                block.to_stack.iter().map(|&index| &block.buffer[index as usize]),
            );
            if let Err(error) = shared.api.send_packets_to_mstcp(&request) {
                warn!("write to stack failed: {error}");
            }
            drop(request);
            block.to_stack.clear();
        }

        if next.send(block).is_err() {
            return;
        }
    }
}

/// Flushes a block's write-to-adapter list and returns the block to the
/// read stage.
fn write_adapter_stage<D: DriverIo>(
    shared: Arc<Shared<D>>,
    adapter: Arc<NetworkAdapter<D>>,
    input: Receiver<PacketBlock>,
    back_to_read: Sender<PacketBlock>,
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
            let request = EtherMultiRequest::<MAXIMUM_PACKET_BLOCK>::from_iter(
                adapter.handle(),
                block
                    .to_adapter
                    .iter()
                    .map(|&index| &block.buffer[index as usize]),
            );
            if let Err(error) = shared.api.send_packets_to_adapter(&request) {
                warn!("write to adapter failed: {error}");
            }
            drop(request);
            block.to_adapter.clear();
        }

        if back_to_read.send(block).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{on_send_envelope, wait_until, MockDriver};
    use std::time::Duration;

    fn engine_with(
        incoming: Option<Box<PacketClassifier>>,
        outgoing: Option<Box<PacketClassifier>>,
    ) -> (Arc<MockDriver>, QueuedPacketFilter<MockDriver>, AdapterHandle) {
        let api = Arc::new(MockDriver::new());
        let handle = api.add_adapter("\\DEVICE\\{TEST-0}");
        let adapters = api.tcpip_bound_adapters().unwrap();
        let engine = QueuedPacketFilter::new(api.clone(), &adapters, incoming, outgoing).unwrap();
        (api, engine, handle)
    }

    fn pass_outgoing() -> Option<Box<PacketClassifier>> {
        Some(Box::new(|_, _| FilterDecision::Pass))
    }

    #[test]
    fn pipeline_passes_traffic_through() {
        let (api, mut engine, handle) = engine_with(None, pass_outgoing());
        engine.start(0).unwrap();

        for seq in 0..20u8 {
            api.enqueue_packet(handle, on_send_envelope(handle, 64, seq));
        }

        assert!(wait_until(|| api.sent_to_adapter().len() == 20));
        let order: Vec<u8> = api
            .sent_to_adapter()
            .iter()
            .map(|envelope| envelope.data()[0])
            .collect();
        assert_eq!(order, (0..20u8).collect::<Vec<_>>());

        engine.stop().unwrap();
    }

    #[test]
    fn tunnel_mode_follows_classifier_presence() {
        let (api, mut engine, handle) = engine_with(None, pass_outgoing());
        engine.start(0).unwrap();
        assert_eq!(
            api.adapter_mode(handle).unwrap(),
            FilterFlags::MSTCP_FLAG_SENT_TUNNEL
        );
        engine.stop().unwrap();
    }

    #[test]
    fn backpressure_caps_outstanding_blocks() {
        let (api, mut engine, handle) = engine_with(None, pass_outgoing());
        api.pause_adapter_sends();
        engine.start(0).unwrap();

        // Trickle packets so each read drains a fresh batch into a fresh
        // block while the write-to-adapter stage sits on the pause gate.
        for seq in 0..MAXIMUM_BLOCK_NUM as u8 + 5 {
            api.enqueue_packet(handle, on_send_envelope(handle, 64, seq));
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(50));

        // With the pool exhausted the read stage cannot issue new reads.
        assert!(api.read_batches() <= MAXIMUM_BLOCK_NUM);
        assert!(api.sent_to_adapter().is_empty());

        api.resume_adapter_sends();
        assert!(wait_until(|| {
            api.sent_to_adapter().len() == MAXIMUM_BLOCK_NUM + 5
        }));

        engine.stop().unwrap();
    }

    #[test]
    fn stop_is_idempotent() {
        let (_, mut engine, _) = engine_with(None, pass_outgoing());
        engine.start(0).unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.stop().unwrap_err(), Error::NotRunning);
        assert_eq!(engine.state(), FilterState::Stopped);
    }

    #[test]
    fn redirect_reverses_paths() {
        let outgoing: Box<PacketClassifier> = Box::new(|_, _| FilterDecision::Redirect);
        let (api, mut engine, handle) = engine_with(None, Some(outgoing));
        engine.start(0).unwrap();

        for seq in 0..3u8 {
            api.enqueue_packet(handle, on_send_envelope(handle, 64, seq));
        }

        assert!(wait_until(|| api.sent_to_stack().len() == 3));
        assert!(api.sent_to_adapter().is_empty());

        engine.stop().unwrap();
    }
}
