//! Wire-level constants and bitmask types shared with the NDIS filter driver.
//!
//! Everything here is part of the kernel ABI: the numeric values must match
//! the driver build and are asserted by the layout tests in this module tree.

use bitflags::bitflags;

/// Maximum length of an internal adapter device name, zero padded.
pub const ADAPTER_NAME_SIZE: usize = 256;

/// Maximum number of adapters reported by a single enumeration.
pub const ADAPTER_LIST_SIZE: usize = 32;

/// Length of an Ethernet hardware address in bytes.
pub const ETHER_ADDR_LENGTH: usize = 6;

/// Maximum Ethernet frame carried by one packet envelope. Drivers built with
/// jumbo-frame support use 9014 instead; this crate targets the stock build.
pub const MAX_ETHER_FRAME: usize = 1514;

/// Capacity of a sorted multi-packet request.
pub const MAXIMUM_PACKET_BLOCK: usize = 510;

/// Capacity of an unsorted read/send request.
pub const UNSORTED_MAXIMUM_PACKET_BLOCK: usize = 512;

/// Number of packet envelopes in one fast-I/O shared section.
pub const FAST_IO_MAXIMUM_PACKET_BLOCK: usize = 2048 * 3;

/// Number of reusable blocks circulating through a pipelined engine.
pub const MAXIMUM_BLOCK_NUM: usize = 10;

/// Per-link buffer length inside a RAS link record.
pub const RAS_LINK_BUFFER_LENGTH: usize = 2048;

/// Maximum number of RAS links in one query.
pub const RAS_LINKS_MAX: usize = 256;

// Static filter action codes.

/// Pass the packet on unchanged.
pub const FILTER_PACKET_PASS: u32 = 1;
/// Silently drop the packet.
pub const FILTER_PACKET_DROP: u32 = 2;
/// Divert the packet to the user-mode application.
pub const FILTER_PACKET_REDIRECT: u32 = 3;
/// Pass the packet and divert a copy to the application.
pub const FILTER_PACKET_PASS_RDR: u32 = 4;
/// Drop the packet and divert a copy to the application.
pub const FILTER_PACKET_DROP_RDR: u32 = 5;

// Union selector values for the layered filter records.

/// Data-link selector: Ethernet 802.3.
pub const ETH_802_3: u32 = 1;

/// Network selector: IPv4.
pub const IPV4: u32 = 1;
/// Network selector: IPv6.
pub const IPV6: u32 = 2;

/// Transport selector: TCP or UDP.
pub const TCPUDP: u32 = 1;
/// Transport selector: ICMP.
pub const ICMP: u32 = 2;

/// Address stored as subnet (address + mask), IPv4.
pub const IP_SUBNET_V4_TYPE: u32 = 1;
/// Address stored as inclusive range, IPv4.
pub const IP_RANGE_V4_TYPE: u32 = 2;
/// Address stored as subnet (address + mask), IPv6.
pub const IP_SUBNET_V6_TYPE: u32 = 1;
/// Address stored as inclusive range, IPv6.
pub const IP_RANGE_V6_TYPE: u32 = 2;

bitflags! {
    /// Adapter interception mode submitted with the set-mode ioctl.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FilterFlags: u32 {
        /// Queue packets sent from the protocol stack; originals are dropped.
        const MSTCP_FLAG_SENT_TUNNEL = 0x0000_0001;
        /// Queue packets indicated to the protocol stack; originals are dropped.
        const MSTCP_FLAG_RECV_TUNNEL = 0x0000_0002;
        /// Queue copies of sent packets; originals go ahead.
        const MSTCP_FLAG_SENT_LISTEN = 0x0000_0004;
        /// Queue copies of received packets; originals go ahead.
        const MSTCP_FLAG_RECV_LISTEN = 0x0000_0008;
        /// Block promiscuous-mode traffic not addressed to this interface.
        const MSTCP_FLAG_FILTER_DIRECT = 0x0000_0010;
        /// Queue loopback packets instead of silently passing them.
        const MSTCP_FLAG_LOOPBACK_FILTER = 0x0000_0020;
        /// Silently drop loopback packets (except broadcast/multicast).
        const MSTCP_FLAG_LOOPBACK_BLOCK = 0x0000_0040;
        /// Both tunnel directions.
        const MSTCP_FLAG_SENT_RECEIVE_TUNNEL =
            Self::MSTCP_FLAG_SENT_TUNNEL.bits() | Self::MSTCP_FLAG_RECV_TUNNEL.bits();
        /// Both listen directions.
        const MSTCP_FLAG_SENT_RECEIVE_LISTEN =
            Self::MSTCP_FLAG_SENT_LISTEN.bits() | Self::MSTCP_FLAG_RECV_LISTEN.bits();
    }
}

bitflags! {
    /// Direction of a captured frame, and the direction mask of a rule.
    ///
    /// A frame carries exactly one of the two bits in its envelope; a rule may
    /// carry both, meaning "either direction matches".
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DirectionFlags: u32 {
        /// Captured on the send path (host to network).
        const PACKET_FLAG_ON_SEND = 0x0000_0001;
        /// Captured on the receive path (network to host).
        const PACKET_FLAG_ON_RECEIVE = 0x0000_0002;
        /// Rule mask matching both directions.
        const PACKET_FLAG_ON_SEND_RECEIVE =
            Self::PACKET_FLAG_ON_SEND.bits() | Self::PACKET_FLAG_ON_RECEIVE.bits();
    }
}

bitflags! {
    /// Marks which filter layers of a static rule carry valid sub-filters.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FilterLayerFlags: u32 {
        /// The data-link sub-filter is valid.
        const DATA_LINK_LAYER_VALID = 0x0000_0001;
        /// The network sub-filter is valid.
        const NETWORK_LAYER_VALID = 0x0000_0002;
        /// The transport sub-filter is valid.
        const TRANSPORT_LAYER_VALID = 0x0000_0004;
    }
}

bitflags! {
    /// Valid fields of an Ethernet 802.3 sub-filter.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Eth802_3FilterFlags: u32 {
        /// Match the source MAC address.
        const ETH_802_3_SRC_ADDRESS = 0x0000_0001;
        /// Match the destination MAC address.
        const ETH_802_3_DEST_ADDRESS = 0x0000_0002;
        /// Match the EtherType field.
        const ETH_802_3_PROTOCOL = 0x0000_0004;
    }
}

bitflags! {
    /// Valid fields of an IPv4 sub-filter.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IpV4FilterFlags: u32 {
        /// Match the source address.
        const IP_V4_FILTER_SRC_ADDRESS = 0x0000_0001;
        /// Match the destination address.
        const IP_V4_FILTER_DEST_ADDRESS = 0x0000_0002;
        /// Match the IP protocol number.
        const IP_V4_FILTER_PROTOCOL = 0x0000_0004;
    }
}

bitflags! {
    /// Valid fields of an IPv6 sub-filter.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IpV6FilterFlags: u32 {
        /// Match the source address.
        const IP_V6_FILTER_SRC_ADDRESS = 0x0000_0001;
        /// Match the destination address.
        const IP_V6_FILTER_DEST_ADDRESS = 0x0000_0002;
        /// Match the next-header protocol number.
        const IP_V6_FILTER_PROTOCOL = 0x0000_0004;
    }
}

bitflags! {
    /// Valid fields of a TCP/UDP sub-filter.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpUdpFilterFlags: u32 {
        /// Match the source port range.
        const TCPUDP_SRC_PORT = 0x0000_0001;
        /// Match the destination port range.
        const TCPUDP_DEST_PORT = 0x0000_0002;
        /// Match the TCP flags byte (ignored for UDP).
        const TCPUDP_TCP_FLAGS = 0x0000_0004;
    }
}

bitflags! {
    /// Valid fields of an ICMP sub-filter.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IcmpFilterFlags: u32 {
        /// Match the ICMP type range.
        const ICMP_TYPE = 0x0000_0001;
        /// Match the ICMP code range.
        const ICMP_CODE = 0x0000_0002;
    }
}
