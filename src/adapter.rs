//! Per-adapter facade used by the filter engines.
//!
//! One [`NetworkAdapter`] owns the packet-arrival event for its adapter and
//! tracks the interception mode it installed, so teardown can restore the
//! adapter to its original state no matter how the engine exits.

use std::sync::Arc;

use parking_lot::Mutex;
use windows::Win32::Foundation::HANDLE;

use crate::abi::{AdapterHandle, FilterFlags, ETHER_ADDR_LENGTH};
use crate::api::DriverIo;
use crate::event::SafeEvent;
use crate::Result;

/// Classification of an adapter as regular or one of the NDISWAN variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NdisWanKind {
    /// A regular interface.
    #[default]
    None,
    /// NDISWAN IPv4 interface.
    Ip,
    /// NDISWAN IPv6 interface.
    Ipv6,
    /// NDISWAN bridge-head interface.
    BridgeHead,
}

/// One network adapter bound to the driver, with its event and mode state.
pub struct NetworkAdapter<D: DriverIo> {
    api: Arc<D>,
    handle: AdapterHandle,
    internal_name: String,
    friendly_name: String,
    medium: u32,
    hw_address: [u8; ETHER_ADDR_LENGTH],
    mtu: u16,
    wan_kind: NdisWanKind,
    current_mode: Mutex<FilterFlags>,
    packet_event: Arc<SafeEvent>,
}

impl<D: DriverIo> NetworkAdapter<D> {
    /// Builds a facade with its own manual-reset packet event.
    pub fn new(
        api: Arc<D>,
        handle: AdapterHandle,
        hw_address: [u8; ETHER_ADDR_LENGTH],
        internal_name: String,
        medium: u32,
        mtu: u16,
    ) -> Result<Self> {
        let event = Arc::new(SafeEvent::new(true, false)?);
        Self::with_event(api, handle, hw_address, internal_name, medium, mtu, event)
    }

    /// Builds a facade waiting on a caller-provided event. The multi-adapter
    /// engine shares one event across every filtered adapter.
    pub fn with_event(
        api: Arc<D>,
        handle: AdapterHandle,
        hw_address: [u8; ETHER_ADDR_LENGTH],
        internal_name: String,
        medium: u32,
        mtu: u16,
        packet_event: Arc<SafeEvent>,
    ) -> Result<Self> {
        let friendly_name = api.friendly_adapter_name(&internal_name);
        let wan_kind = api.classify_wan_kind(&internal_name);

        Ok(Self {
            api,
            handle,
            internal_name,
            friendly_name,
            medium,
            hw_address,
            mtu,
            wan_kind,
            current_mode: Mutex::new(FilterFlags::default()),
            packet_event,
        })
    }

    /// The kernel key for this adapter.
    pub fn handle(&self) -> AdapterHandle {
        self.handle
    }

    /// Internal device name.
    pub fn name(&self) -> &str {
        &self.internal_name
    }

    /// Human-readable connection name.
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    /// NDIS medium.
    pub fn medium(&self) -> u32 {
        self.medium
    }

    /// Configured hardware address.
    pub fn hw_address(&self) -> &[u8; ETHER_ADDR_LENGTH] {
        &self.hw_address
    }

    /// Current MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// NDISWAN classification.
    pub fn wan_kind(&self) -> NdisWanKind {
        self.wan_kind
    }

    /// The packet-arrival event this facade waits on.
    pub fn packet_event(&self) -> &Arc<SafeEvent> {
        &self.packet_event
    }

    /// Installs `flags` as the adapter's interception mode. Idempotent.
    pub fn set_mode(&self, flags: FilterFlags) -> Result<()> {
        self.api.set_adapter_mode(self.handle, flags)?;
        *self.current_mode.lock() = flags;
        Ok(())
    }

    /// The interception mode as the driver reports it.
    pub fn mode(&self) -> Result<FilterFlags> {
        self.api.adapter_mode(self.handle)
    }

    /// The last mode this facade installed, without asking the driver.
    pub fn cached_mode(&self) -> FilterFlags {
        *self.current_mode.lock()
    }

    /// Registers the packet event with the driver so it is signaled whenever
    /// at least one packet is queued for this adapter.
    pub fn bind_packet_event(&self) -> Result<()> {
        self.api
            .set_packet_event(self.handle, self.packet_event.handle())
    }

    /// Detaches the packet event from the driver.
    pub fn unbind_packet_event(&self) -> Result<()> {
        self.api.set_packet_event(self.handle, HANDLE::default())
    }

    /// Blocks until the packet event is signaled or `timeout_ms` elapses.
    pub fn wait_event(&self, timeout_ms: u32) -> Result<u32> {
        self.packet_event.wait(timeout_ms)
    }

    /// Signals the packet event, waking any waiter.
    pub fn signal_event(&self) -> Result<()> {
        self.packet_event.signal()
    }

    /// Returns the packet event to the non-signaled state.
    pub fn reset_event(&self) -> Result<()> {
        self.packet_event.reset()
    }

    /// Drops whatever the driver has queued for this adapter.
    pub fn flush(&self) -> Result<()> {
        self.api.flush_adapter_packet_queue(self.handle)
    }

    /// Stops filtering this adapter and restores its original state: wakes
    /// any waiter, clears the interception mode and flushes the queue. After
    /// this call no more reads are delivered for the adapter.
    pub fn close(&self) {
        let _ = self.signal_event();
        *self.current_mode.lock() = FilterFlags::default();
        let _ = self.api.set_adapter_mode(self.handle, FilterFlags::default());
        let _ = self.api.flush_adapter_packet_queue(self.handle);
    }
}
