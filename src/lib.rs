//! User-mode packet interception engine for the Windows Packet Filter NDIS
//! driver.
//!
//! Applications open the driver, choose one or more network adapters and
//! receive every Ethernet frame flowing through them, with the opportunity to
//! inspect, modify, drop or re-inject each frame in either direction.
//!
//! ## Module tour
//!
//! * [`abi`] — the binary contract with the kernel peer: fixed-layout
//!   records, constants and the ioctl schedule.
//! * `api` — the [`NdisRd`] device handle, the single `control` primitive
//!   every ioctl goes through, and the [`DriverIo`] seam the higher layers
//!   are generic over.
//! * `adapter` — the per-adapter facade owning the packet event and the
//!   interception mode.
//! * `rules` / `table` — chainable [`FilterRule`] construction and the
//!   [`FilterTable`] that keeps a user-space mirror of the in-kernel rule
//!   table.
//! * `engine` — three interchangeable filtering strategies:
//!   [`BlockingPacketFilter`] (one worker, one adapter),
//!   [`QueuedPacketFilter`] (four pipelined stages, one adapter) and
//!   [`FastIoPacketFilter`] (multi-adapter, shared-memory reads).
//!
//! ## A minimal pass-through
//!
//! ```no_run
//! use std::sync::Arc;
//! use ndisrd::{BlockingPacketFilter, FilterDecision, NdisRd};
//!
//! # fn main() -> ndisrd::Result<()> {
//! let driver = Arc::new(NdisRd::open()?);
//! let adapters = driver.tcpip_bound_adapters()?;
//!
//! let mut filter = BlockingPacketFilter::new(
//!     driver,
//!     &adapters,
//!     Some(Box::new(|_, _| FilterDecision::Pass)),
//!     Some(Box::new(|_, _| FilterDecision::Pass)),
//! )?;
//! filter.start(0)?;
//! // ... frames flow through the classifiers ...
//! filter.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod abi;
mod adapter;
mod api;
mod engine;
mod error;
mod event;
mod rules;
mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::abi::{
    AdapterHandle, DirectionFlags, EtherMultiRequest, EtherMultiRequestMut, EtherRequest,
    EtherRequestMut, FilterFlags, FilterLayerFlags, IntermediateBuffer, PacketOidData, RasLinks,
    StaticFilter, StaticFilterTable, TcpAdapterList, ETHER_ADDR_LENGTH, MAX_ETHER_FRAME,
};
pub use crate::adapter::{NdisWanKind, NetworkAdapter};
pub use crate::api::{DriverIo, NdisRd, Version};
pub use crate::engine::{
    BlockingPacketFilter, FastIoPacketFilter, FilterDecision, FilterState, PacketClassifier,
    QueuedPacketFilter, RoutingClassifier,
};
pub use crate::error::{Error, Result};
pub use crate::event::SafeEvent;
pub use crate::rules::{AddressFilter, FilterRule, RuleAction, RuleDirection, RuleStats};
pub use crate::table::FilterTable;
