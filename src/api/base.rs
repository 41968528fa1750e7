//! Base driver queries: version, adapter enumeration, modes and events.

use std::ffi::c_void;
use std::fmt::{Display, Formatter};
use std::mem::size_of;

use windows::Win32::Foundation::HANDLE;

use super::NdisRd;
use crate::abi::*;
use crate::Result;

/// Object identifier of the NDIS hardware packet filter.
pub const OID_GEN_CURRENT_PACKET_FILTER: u32 = 0x0001_010E;

/// Parsed driver version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

impl From<u32> for Version {
    fn from(word: u32) -> Self {
        Self {
            major: (word & 0x0000_f000) >> 12,
            minor: (word & 0xff00_0000) >> 24,
            revision: (word & 0x00ff_0000) >> 16,
        }
    }
}

impl NdisRd {
    /// Raw driver version word.
    pub(crate) fn version_word(&self) -> Result<u32> {
        let mut word = u32::MAX;
        self.control_in_out(IOCTL_NDISRD_GET_VERSION, &mut word)?;
        Ok(word)
    }

    /// Queries and parses the driver version.
    pub fn get_version(&self) -> Result<Version> {
        Ok(Version::from(self.version_word()?))
    }

    /// Effective size of the driver's intermediate-buffer pool.
    pub fn intermediate_buffer_pool_size(&self) -> Result<u32> {
        let mut size = 0u32;
        self.control_in_out(IOCTL_NDISRD_QUERY_IB_POOL_SIZE, &mut size)?;
        Ok(size)
    }

    /// Enumerates the adapters currently bound to TCP/IP.
    pub fn tcpip_bound_adapters(&self) -> Result<TcpAdapterList> {
        let mut list = TcpAdapterList::default();
        self.control_in_out(IOCTL_NDISRD_GET_TCPIP_INTERFACES, &mut list)?;
        Ok(list)
    }

    /// Sets the interception mode of `adapter`.
    pub fn set_adapter_mode(&self, adapter: AdapterHandle, flags: FilterFlags) -> Result<()> {
        let mode = AdapterMode {
            adapter_handle: adapter,
            flags,
        };
        self.control_in(IOCTL_NDISRD_SET_ADAPTER_MODE, &mode)
    }

    /// Reads back the interception mode of `adapter`.
    pub fn adapter_mode(&self, adapter: AdapterHandle) -> Result<FilterFlags> {
        let mut mode = AdapterMode {
            adapter_handle: adapter,
            flags: FilterFlags::default(),
        };
        self.control_in_out(IOCTL_NDISRD_GET_ADAPTER_MODE, &mut mode)?;
        Ok(mode.flags)
    }

    /// Registers `event` to be signaled when the TCP/IP-bound adapter list
    /// changes (plug/unplug, enable/disable and similar).
    pub fn set_adapter_list_change_event(&self, event: HANDLE) -> Result<()> {
        self.control_in(IOCTL_NDISRD_SET_ADAPTER_EVENT, &event)
    }

    /// Registers `event` to be signaled when a WAN link connects or
    /// disconnects.
    pub fn set_wan_event(&self, event: HANDLE) -> Result<()> {
        self.control_in(IOCTL_NDISRD_SET_WAN_EVENT, &event)
    }

    /// Registers `event` to be signaled when an adapter's hardware filter
    /// changes.
    pub fn set_hw_packet_filter_event(&self, event: HANDLE) -> Result<()> {
        self.control_in(IOCTL_NDISRD_SET_ADAPTER_HWFILTER_EVENT, &event)
    }

    /// Performs an NDIS OID set request against the adapter named in
    /// `request`.
    pub fn ndis_set_request<T>(&self, request: &PacketOidData<T>) -> Result<()> {
        self.control(
            IOCTL_NDISRD_NDIS_SET_REQUEST,
            Some(request as *const PacketOidData<T> as *const c_void),
            size_of::<PacketOidData<T>>() as u32,
            None,
            0,
            None,
            None,
        )
    }

    /// Performs an NDIS OID get request against the adapter named in
    /// `request`.
    pub fn ndis_get_request<T>(&self, request: &mut PacketOidData<T>) -> Result<()> {
        self.control(
            IOCTL_NDISRD_NDIS_GET_REQUEST,
            Some(request as *const PacketOidData<T> as *const c_void),
            size_of::<PacketOidData<T>>() as u32,
            Some(request as *mut PacketOidData<T> as *mut c_void),
            size_of::<PacketOidData<T>>() as u32,
            None,
            None,
        )
    }

    /// Reads the current hardware packet filter of `adapter`.
    pub fn hw_packet_filter(&self, adapter: AdapterHandle) -> Result<u32> {
        let mut oid = PacketOidData::new(adapter, OID_GEN_CURRENT_PACKET_FILTER, 0u32);
        self.ndis_get_request(&mut oid)?;
        Ok(oid.data)
    }

    /// Sets the hardware packet filter of `adapter`.
    pub fn set_hw_packet_filter(&self, adapter: AdapterHandle, filter: u32) -> Result<()> {
        let oid = PacketOidData::new(adapter, OID_GEN_CURRENT_PACKET_FILTER, filter);
        self.ndis_set_request(&oid)
    }

    /// Queries information about active WAN links.
    pub fn ras_links(&self, adapter: AdapterHandle, links: &mut RasLinks) -> Result<()> {
        self.control(
            IOCTL_NDISRD_GET_RAS_LINKS,
            Some(&adapter as *const AdapterHandle as *const c_void),
            size_of::<AdapterHandle>() as u32,
            Some(links as *mut RasLinks as *mut c_void),
            size_of::<RasLinks>() as u32,
            None,
            None,
        )
    }
}
