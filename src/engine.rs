//! Packet filter engines.
//!
//! Three interchangeable strategies implement the same contract: construct
//! with the driver handle, the current adapter list and the two classifier
//! callbacks; `start` / `stop` move the engine through
//! `Stopped → Starting → Running → Stopping → Stopped`; classifiers decide
//! the fate of each frame and the engine dispatches by the table below.
//!
//! | decision | captured on send   | captured on receive |
//! |----------|--------------------|---------------------|
//! | pass     | write to adapter   | write to stack      |
//! | redirect | write to stack     | write to adapter    |
//! | drop     | discard            | discard             |
//!
//! Classifiers run synchronously on the hot path: blocking inside one stalls
//! the whole engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::abi::{AdapterHandle, DirectionFlags, IntermediateBuffer, TcpAdapterList};
use crate::adapter::NetworkAdapter;
use crate::api::DriverIo;
use crate::event::SafeEvent;
use crate::{Error, Result};

pub mod blocking;
pub mod multi;
pub(crate) mod pool;
pub mod queued;

pub use self::blocking::BlockingPacketFilter;
pub use self::multi::FastIoPacketFilter;
pub use self::queued::QueuedPacketFilter;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterState {
    /// No workers running; safe to reconfigure.
    Stopped = 0,
    /// `start` is initializing resources.
    Starting = 1,
    /// Workers are processing frames.
    Running = 2,
    /// `stop` is tearing workers down.
    Stopping = 3,
}

/// Atomic cell holding a [`FilterState`], shared between the engine facade
/// and its workers.
pub(crate) struct StateCell(AtomicU32);

impl StateCell {
    pub(crate) fn new(state: FilterState) -> Self {
        Self(AtomicU32::new(state as u32))
    }

    pub(crate) fn load(&self) -> FilterState {
        match self.0.load(Ordering::Acquire) {
            0 => FilterState::Stopped,
            1 => FilterState::Starting,
            2 => FilterState::Running,
            _ => FilterState::Stopping,
        }
    }

    pub(crate) fn store(&self, state: FilterState) {
        self.0.store(state as u32, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.load() == FilterState::Running
    }
}

/// Verdict a classifier returns for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the frame on its original path.
    Pass,
    /// Discard the frame.
    Drop,
    /// Swap the frame's direction: a frame from the adapter is queued to the
    /// stack and vice versa.
    Redirect,
}

/// Per-frame callback of the single-adapter engines.
pub type PacketClassifier =
    dyn Fn(AdapterHandle, &mut IntermediateBuffer) -> FilterDecision + Send + Sync;

/// Per-frame callback of the multi-adapter engine. The optional handle
/// overrides the envelope's origin before injection, enabling cross-adapter
/// redirection.
pub type RoutingClassifier = dyn Fn(AdapterHandle, &mut IntermediateBuffer) -> (FilterDecision, Option<AdapterHandle>)
    + Send
    + Sync;

/// Where a classified frame goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchTarget {
    /// Inject towards the network interface.
    ToAdapter,
    /// Inject up the protocol stack.
    ToStack,
    /// Do nothing; the frame dies here.
    Discard,
}

/// The dispatch table every engine shares.
pub(crate) fn dispatch(direction: DirectionFlags, decision: FilterDecision) -> DispatchTarget {
    let on_send = direction.contains(DirectionFlags::PACKET_FLAG_ON_SEND);
    match decision {
        FilterDecision::Pass => {
            if on_send {
                DispatchTarget::ToAdapter
            } else {
                DispatchTarget::ToStack
            }
        }
        FilterDecision::Redirect => {
            if on_send {
                DispatchTarget::ToStack
            } else {
                DispatchTarget::ToAdapter
            }
        }
        FilterDecision::Drop => DispatchTarget::Discard,
    }
}

/// Spawns one named worker thread, surfacing the OS error to the caller
/// instead of panicking.
pub(crate) fn spawn_stage(
    name: &str,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
        .map_err(|error| Error::Io(error.raw_os_error().unwrap_or(0) as u32))
}

/// Builds one facade per enumerated adapter. Adapters that fail facade
/// construction are skipped with a log line, mirroring the tolerance of the
/// enumeration path everywhere else.
pub(crate) fn build_network_interfaces<D: DriverIo>(
    api: &Arc<D>,
    adapters: &TcpAdapterList,
    shared_event: Option<&Arc<SafeEvent>>,
) -> Result<Vec<Arc<NetworkAdapter<D>>>> {
    let mut interfaces = Vec::with_capacity(adapters.count());

    for index in 0..adapters.count() {
        let name = adapters.name(index);
        let handle = adapters.adapter_handle[index];
        let hw_address = adapters.current_address[index];
        let medium = adapters.adapter_medium_list[index];
        let mtu = adapters.mtu[index];

        let facade = match shared_event {
            Some(event) => NetworkAdapter::with_event(
                api.clone(),
                handle,
                hw_address,
                name,
                medium,
                mtu,
                event.clone(),
            ),
            None => NetworkAdapter::new(api.clone(), handle, hw_address, name, medium, mtu),
        };

        match facade {
            Ok(adapter) => interfaces.push(Arc::new(adapter)),
            Err(error) => {
                log::warn!("skipping adapter {index}: {error}");
            }
        }
    }

    Ok(interfaces)
}
