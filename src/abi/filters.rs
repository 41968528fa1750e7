//! Static-filter wire records.
//!
//! A rule is evaluated in the kernel against up to three layers; each layer
//! is a C-style union selected by a 32-bit selector word. The packed unions
//! below reproduce the driver's layout byte for byte; the selector constants
//! live in [`super::constants`].

use std::net::{Ipv4Addr, Ipv6Addr};

use windows::Win32::Networking::WinSock::{IN6_ADDR, IN6_ADDR_0, IN_ADDR, IN_ADDR_0};

use super::constants::*;
use super::records::AdapterHandle;

/// Converts an IPv4 address into the in-memory network-byte-order form the
/// driver compares against packet headers.
pub fn in_addr_from_ipv4(addr: Ipv4Addr) -> IN_ADDR {
    IN_ADDR {
        S_un: IN_ADDR_0 {
            S_addr: u32::from_ne_bytes(addr.octets()),
        },
    }
}

/// Reads an IPv4 address back out of its wire form.
pub fn ipv4_from_in_addr(addr: IN_ADDR) -> Ipv4Addr {
    Ipv4Addr::from(unsafe { addr.S_un.S_addr }.to_ne_bytes())
}

/// Converts an IPv6 address into its wire form.
pub fn in6_addr_from_ipv6(addr: Ipv6Addr) -> IN6_ADDR {
    IN6_ADDR {
        u: IN6_ADDR_0 {
            Byte: addr.octets(),
        },
    }
}

/// Reads an IPv6 address back out of its wire form.
pub fn ipv6_from_in6_addr(addr: IN6_ADDR) -> Ipv6Addr {
    Ipv6Addr::from(unsafe { addr.u.Byte })
}

/// Ethernet 802.3 sub-filter.
#[repr(C, packed)]
#[derive(Debug, Copy, Clone)]
pub struct Eth8023Filter {
    /// Which of the fields below participate in matching.
    pub valid_fields: Eth802_3FilterFlags,
    /// Source MAC address to match.
    pub src_address: [u8; ETHER_ADDR_LENGTH],
    /// Destination MAC address to match.
    pub dest_address: [u8; ETHER_ADDR_LENGTH],
    /// EtherType to match, network byte order.
    pub protocol: u16,
    /// Alignment padding.
    pub padding: u16,
}

impl Default for Eth8023Filter {
    fn default() -> Self {
        // A zeroed sub-filter matches nothing until valid bits are set.
        unsafe { std::mem::zeroed() }
    }
}

/// IPv4 subnet: address plus mask.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpSubnetV4 {
    /// Network address.
    pub ip: IN_ADDR,
    /// Subnet mask.
    pub ip_mask: IN_ADDR,
}

/// Inclusive IPv4 address range.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpRangeV4 {
    /// First address of the range.
    pub start_ip: IN_ADDR,
    /// Last address of the range.
    pub end_ip: IN_ADDR,
}

/// Subnet-or-range payload of an IPv4 address filter.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union IpAddressV4Union {
    /// Subnet variant.
    pub ip_subnet: IpSubnetV4,
    /// Range variant.
    pub ip_range: IpRangeV4,
}

impl Default for IpAddressV4Union {
    fn default() -> Self {
        // Zeroed is 0.0.0.0/0 in either interpretation.
        unsafe { std::mem::zeroed() }
    }
}

/// IPv4 address filter: selector word plus subnet-or-range payload.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpAddressV4 {
    /// [`IP_SUBNET_V4_TYPE`] or [`IP_RANGE_V4_TYPE`].
    pub address_type: u32,
    /// The selected variant, zero padded to the union size.
    pub address: IpAddressV4Union,
}

/// IPv4 sub-filter.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpV4Filter {
    /// Which of the fields below participate in matching.
    pub valid_fields: IpV4FilterFlags,
    /// Source address filter.
    pub src_address: IpAddressV4,
    /// Destination address filter.
    pub dest_address: IpAddressV4,
    /// IP protocol number.
    pub protocol: u8,
    /// Alignment padding.
    pub padding: [u8; 3],
}

/// IPv6 subnet: address plus mask.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct IpSubnetV6 {
    /// Network address.
    pub ip: IN6_ADDR,
    /// Subnet mask.
    pub ip_mask: IN6_ADDR,
}

/// Inclusive IPv6 address range.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct IpRangeV6 {
    /// First address of the range.
    pub start_ip: IN6_ADDR,
    /// Last address of the range.
    pub end_ip: IN6_ADDR,
}

/// Subnet-or-range payload of an IPv6 address filter.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union IpAddressV6Union {
    /// Subnet variant.
    pub ip_subnet: IpSubnetV6,
    /// Range variant.
    pub ip_range: IpRangeV6,
}

impl Default for IpAddressV6Union {
    fn default() -> Self {
        // Zeroed is ::/0 in either interpretation.
        unsafe { std::mem::zeroed() }
    }
}

/// IPv6 address filter: selector word plus subnet-or-range payload.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpAddressV6 {
    /// [`IP_SUBNET_V6_TYPE`] or [`IP_RANGE_V6_TYPE`].
    pub address_type: u32,
    /// The selected variant, zero padded to the union size.
    pub address: IpAddressV6Union,
}

/// IPv6 sub-filter.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct IpV6Filter {
    /// Which of the fields below participate in matching.
    pub valid_fields: IpV6FilterFlags,
    /// Source address filter.
    pub src_address: IpAddressV6,
    /// Destination address filter.
    pub dest_address: IpAddressV6,
    /// Next-header protocol number.
    pub protocol: u8,
    /// Alignment padding.
    pub padding: [u8; 3],
}

/// Inclusive TCP/UDP port range.
#[repr(C, packed)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PortRange {
    /// First port of the range.
    pub start_range: u16,
    /// Last port of the range.
    pub end_range: u16,
}

/// TCP/UDP sub-filter.
#[repr(C, packed)]
#[derive(Default, Debug, Copy, Clone)]
pub struct TcpUdpFilter {
    /// Which of the fields below participate in matching.
    pub valid_fields: TcpUdpFilterFlags,
    /// Source port range.
    pub source_port: PortRange,
    /// Destination port range.
    pub dest_port: PortRange,
    /// TCP flags mask; ignored for UDP.
    pub tcp_flags: u8,
    /// Alignment padding.
    pub padding: [u8; 3],
}

/// Inclusive byte range, used for ICMP type and code matching.
#[repr(C)]
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ByteRange {
    /// First value of the range.
    pub start_range: u8,
    /// Last value of the range.
    pub end_range: u8,
}

/// ICMP sub-filter.
#[repr(C, packed)]
#[derive(Default, Debug, Copy, Clone)]
pub struct IcmpFilter {
    /// Which of the fields below participate in matching.
    pub valid_fields: IcmpFilterFlags,
    /// ICMP type range.
    pub type_range: ByteRange,
    /// ICMP code range.
    pub code_range: ByteRange,
}

/// Data-link-layer payload union. Currently only Ethernet 802.3.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union DataLinkLayerFilterUnion {
    /// The Ethernet 802.3 variant.
    pub eth_8023_filter: Eth8023Filter,
}

impl Default for DataLinkLayerFilterUnion {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Data-link-layer filter: selector word plus payload.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct DataLinkLayerFilter {
    /// [`ETH_802_3`].
    pub union_selector: u32,
    /// The selected variant.
    pub data_link_layer: DataLinkLayerFilterUnion,
}

/// Network-layer payload union: IPv4 or IPv6.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union NetworkLayerFilterUnion {
    /// The IPv4 variant.
    pub ipv4: IpV4Filter,
    /// The IPv6 variant.
    pub ipv6: IpV6Filter,
}

impl Default for NetworkLayerFilterUnion {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Network-layer filter: selector word plus payload.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct NetworkLayerFilter {
    /// [`IPV4`] or [`IPV6`].
    pub union_selector: u32,
    /// The selected variant, zero padded to the union size.
    pub network_layer: NetworkLayerFilterUnion,
}

/// Transport-layer payload union: TCP/UDP or ICMP.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub union TransportLayerFilterUnion {
    /// The TCP/UDP variant.
    pub tcp_udp: TcpUdpFilter,
    /// The ICMP variant.
    pub icmp: IcmpFilter,
}

impl Default for TransportLayerFilterUnion {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Transport-layer filter: selector word plus payload.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct TransportLayerFilter {
    /// [`TCPUDP`] or [`ICMP`].
    pub union_selector: u32,
    /// The selected variant, zero padded to the union size.
    pub transport_layer: TransportLayerFilterUnion,
}

/// One row of the in-kernel evaluation table.
///
/// The driver walks rows top to bottom and applies the first match; the
/// per-rule counters are produced by the driver and come back on read-back.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct StaticFilter {
    /// Adapter the rule binds to; zero means any adapter. Kept 8 bytes wide
    /// for structure compatibility across x86 and x64.
    pub adapter_handle: AdapterHandle,
    /// Direction mask; may carry both bits ("either direction matches").
    pub direction_flags: DirectionFlags,
    /// One of the `FILTER_PACKET_*` action codes.
    pub filter_action: u32,
    /// Which layer sub-filters below carry valid values.
    pub valid_fields: FilterLayerFlags,
    /// Seconds since 1 Jan 1980 at the last counter reset.
    pub last_reset: u32,
    /// Packets matched on the receive path.
    pub packets_in: u64,
    /// Bytes matched on the receive path.
    pub bytes_in: u64,
    /// Packets matched on the send path.
    pub packets_out: u64,
    /// Bytes matched on the send path.
    pub bytes_out: u64,
    /// Data-link-layer criteria.
    pub data_link_filter: DataLinkLayerFilter,
    /// Network-layer criteria.
    pub network_filter: NetworkLayerFilter,
    /// Transport-layer criteria.
    pub transport_filter: TransportLayerFilter,
}

impl std::fmt::Debug for StaticFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFilter")
            .field("adapter_handle", &{ self.adapter_handle })
            .field("direction_flags", &{ self.direction_flags })
            .field("filter_action", &{ self.filter_action })
            .field("valid_fields", &{ self.valid_fields })
            .field("last_reset", &{ self.last_reset })
            .field("packets_in", &{ self.packets_in })
            .field("bytes_in", &{ self.bytes_in })
            .field("packets_out", &{ self.packets_out })
            .field("bytes_out", &{ self.bytes_out })
            .finish_non_exhaustive()
    }
}

/// Fixed-capacity static filter table header as the driver lays it out.
///
/// The wire form is this header followed by `table_size` contiguous
/// [`StaticFilter`] rows; [`crate::FilterTable`] serializes variable-length
/// tables into that shape.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct StaticFilterTable<const N: usize> {
    /// Number of valid rows in `static_filters`.
    pub table_size: u32,
    /// Alignment padding.
    pub padding: u32,
    /// The rows.
    pub static_filters: [StaticFilter; N],
}

impl<const N: usize> StaticFilterTable<N> {
    /// A table with `N` zeroed rows.
    pub fn new() -> Self {
        Self {
            table_size: N as u32,
            padding: 0,
            static_filters: [StaticFilter::default(); N],
        }
    }
}

impl<const N: usize> Default for StaticFilterTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of the insert-at ioctl: position first, then the rule.
#[repr(C, packed)]
#[derive(Default, Copy, Clone)]
pub struct StaticFilterWithPosition {
    /// Zero-based position the rule is inserted at.
    pub position: u32,
    /// The rule to insert.
    pub filter: StaticFilter,
}
