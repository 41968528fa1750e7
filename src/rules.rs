//! User-facing filter rules and their wire conversions.
//!
//! A [`FilterRule`] is built once with chainable setters and is immutable
//! afterwards; it carries no kernel handles. [`FilterRule::to_wire`] turns it
//! into the driver's [`StaticFilter`] record (resolving an interface index
//! against the current adapter list when one was given) and
//! [`FilterRule::from_wire`] reconstructs a rule plus its counters from a
//! read-back row.

use std::net::IpAddr;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

use crate::abi::*;
use crate::{Error, Result};

/// IANA protocol numbers the transport-layer selector cares about.
const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

/// Verdict a rule applies to a matching frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleAction {
    /// Let the frame continue unchanged.
    #[default]
    Pass,
    /// Discard the frame.
    Drop,
    /// Divert the frame to the user-mode application.
    Redirect,
    /// Let the frame continue and divert a copy.
    PassAndRedirect,
    /// Discard the frame and divert a copy.
    DropAndRedirect,
}

impl RuleAction {
    fn to_wire(self) -> u32 {
        match self {
            RuleAction::Pass => FILTER_PACKET_PASS,
            RuleAction::Drop => FILTER_PACKET_DROP,
            RuleAction::Redirect => FILTER_PACKET_REDIRECT,
            RuleAction::PassAndRedirect => FILTER_PACKET_PASS_RDR,
            RuleAction::DropAndRedirect => FILTER_PACKET_DROP_RDR,
        }
    }

    fn from_wire(code: u32) -> Result<Self> {
        Ok(match code {
            FILTER_PACKET_PASS => RuleAction::Pass,
            FILTER_PACKET_DROP => RuleAction::Drop,
            FILTER_PACKET_REDIRECT => RuleAction::Redirect,
            FILTER_PACKET_PASS_RDR => RuleAction::PassAndRedirect,
            FILTER_PACKET_DROP_RDR => RuleAction::DropAndRedirect,
            _ => return Err(Error::InvalidArgument),
        })
    }
}

/// Which capture direction a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleDirection {
    /// Frames received from the network.
    In,
    /// Frames sent by the host.
    Out,
    /// Either direction.
    #[default]
    Both,
}

impl RuleDirection {
    fn to_wire(self) -> DirectionFlags {
        match self {
            RuleDirection::In => DirectionFlags::PACKET_FLAG_ON_RECEIVE,
            RuleDirection::Out => DirectionFlags::PACKET_FLAG_ON_SEND,
            RuleDirection::Both => DirectionFlags::PACKET_FLAG_ON_SEND_RECEIVE,
        }
    }

    fn from_wire(flags: DirectionFlags) -> Self {
        let receive = flags.contains(DirectionFlags::PACKET_FLAG_ON_RECEIVE);
        let send = flags.contains(DirectionFlags::PACKET_FLAG_ON_SEND);
        match (receive, send) {
            (true, true) => RuleDirection::Both,
            (true, false) => RuleDirection::In,
            (false, true) => RuleDirection::Out,
            // An empty mask only appears in hand-built records; treat it as
            // matching everything, like the driver does.
            (false, false) => RuleDirection::Both,
        }
    }
}

/// An L3 address criterion: subnet or inclusive range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    /// Network plus mask.
    Subnet(IpNetwork),
    /// Inclusive range; both ends must share one IP family.
    Range(IpAddr, IpAddr),
}

impl AddressFilter {
    fn family_is_v4(&self) -> bool {
        match self {
            AddressFilter::Subnet(network) => network.is_ipv4(),
            AddressFilter::Range(start, _) => start.is_ipv4(),
        }
    }
}

/// Per-rule counters produced by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleStats {
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
}

/// One filter rule, built with chainable setters.
///
/// ```
/// use ndisrd::{FilterRule, RuleAction, RuleDirection};
///
/// let block_smtp = FilterRule::new()
///     .direction(RuleDirection::Out)
///     .action(RuleAction::Drop)
///     .protocol(6)
///     .dest_port(25, 25);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterRule {
    adapter_handle: Option<AdapterHandle>,
    interface_index: Option<usize>,
    direction: RuleDirection,
    action: RuleAction,
    source_mac: Option<[u8; ETHER_ADDR_LENGTH]>,
    dest_mac: Option<[u8; ETHER_ADDR_LENGTH]>,
    ether_type: Option<u16>,
    source_address: Option<AddressFilter>,
    dest_address: Option<AddressFilter>,
    protocol: Option<u8>,
    source_port: Option<(u16, u16)>,
    dest_port: Option<(u16, u16)>,
    tcp_flags: Option<u8>,
    icmp_type: Option<(u8, u8)>,
    icmp_code: Option<(u8, u8)>,
}

impl FilterRule {
    /// A rule with no criteria: any adapter, both directions, action `Pass`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A terminal default rule: any adapter, both directions, no criteria.
    /// Appended last, it defines the table's fallthrough verdict.
    pub fn terminal(action: RuleAction) -> Self {
        Self::new().action(action)
    }

    /// Binds the rule to a specific adapter handle.
    pub fn adapter(mut self, handle: AdapterHandle) -> Self {
        self.adapter_handle = Some(handle);
        self
    }

    /// Binds the rule to the adapter at `index` in the enumeration current at
    /// serialization time.
    pub fn interface_index(mut self, index: usize) -> Self {
        self.interface_index = Some(index);
        self
    }

    /// Sets the capture direction.
    pub fn direction(mut self, direction: RuleDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the verdict.
    pub fn action(mut self, action: RuleAction) -> Self {
        self.action = action;
        self
    }

    /// Matches the source MAC address.
    pub fn source_mac(mut self, mac: [u8; ETHER_ADDR_LENGTH]) -> Self {
        self.source_mac = Some(mac);
        self
    }

    /// Matches the destination MAC address.
    pub fn dest_mac(mut self, mac: [u8; ETHER_ADDR_LENGTH]) -> Self {
        self.dest_mac = Some(mac);
        self
    }

    /// Matches the EtherType (host byte order).
    pub fn ether_type(mut self, ether_type: u16) -> Self {
        self.ether_type = Some(ether_type);
        self
    }

    /// Matches the source address against a subnet.
    pub fn source_net(mut self, network: IpNetwork) -> Self {
        self.source_address = Some(AddressFilter::Subnet(network));
        self
    }

    /// Matches the source address against an inclusive range.
    pub fn source_range(mut self, start: IpAddr, end: IpAddr) -> Self {
        self.source_address = Some(AddressFilter::Range(start, end));
        self
    }

    /// Matches the destination address against a subnet.
    pub fn dest_net(mut self, network: IpNetwork) -> Self {
        self.dest_address = Some(AddressFilter::Subnet(network));
        self
    }

    /// Matches the destination address against an inclusive range.
    pub fn dest_range(mut self, start: IpAddr, end: IpAddr) -> Self {
        self.dest_address = Some(AddressFilter::Range(start, end));
        self
    }

    /// Matches the IP protocol / next-header number.
    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Matches the source port range, inclusive.
    pub fn source_port(mut self, start: u16, end: u16) -> Self {
        self.source_port = Some((start, end));
        self
    }

    /// Matches the destination port range, inclusive.
    pub fn dest_port(mut self, start: u16, end: u16) -> Self {
        self.dest_port = Some((start, end));
        self
    }

    /// Matches TCP flags against a mask.
    pub fn tcp_flags(mut self, mask: u8) -> Self {
        self.tcp_flags = Some(mask);
        self
    }

    /// Matches the ICMP type range, inclusive.
    pub fn icmp_type(mut self, start: u8, end: u8) -> Self {
        self.icmp_type = Some((start, end));
        self
    }

    /// Matches the ICMP code range, inclusive.
    pub fn icmp_code(mut self, start: u8, end: u8) -> Self {
        self.icmp_code = Some((start, end));
        self
    }

    /// The verdict this rule applies.
    pub fn get_action(&self) -> RuleAction {
        self.action
    }

    /// The capture direction this rule applies to.
    pub fn get_direction(&self) -> RuleDirection {
        self.direction
    }

    fn has_l2_fields(&self) -> bool {
        self.source_mac.is_some() || self.dest_mac.is_some() || self.ether_type.is_some()
    }

    fn has_l3_fields(&self) -> bool {
        self.source_address.is_some() || self.dest_address.is_some() || self.protocol.is_some()
    }

    fn has_l4_fields(&self) -> bool {
        self.source_port.is_some()
            || self.dest_port.is_some()
            || self.tcp_flags.is_some()
            || self.icmp_type.is_some()
            || self.icmp_code.is_some()
    }

    /// Serializes the rule into the driver's record format.
    ///
    /// `adapters` is consulted only when the rule was built with
    /// [`Self::interface_index`]; an index outside the list fails with
    /// [`Error::AdapterOutOfRange`].
    pub fn to_wire(&self, adapters: Option<&TcpAdapterList>) -> Result<StaticFilter> {
        let mut wire = StaticFilter {
            adapter_handle: self.resolve_adapter(adapters)?,
            direction_flags: self.direction.to_wire(),
            filter_action: self.action.to_wire(),
            ..Default::default()
        };

        let mut layers = FilterLayerFlags::default();

        if self.has_l2_fields() {
            layers |= FilterLayerFlags::DATA_LINK_LAYER_VALID;
            wire.data_link_filter = self.l2_to_wire();
        }

        if self.has_l3_fields() {
            layers |= FilterLayerFlags::NETWORK_LAYER_VALID;
            wire.network_filter = self.l3_to_wire()?;
        }

        if self.has_l4_fields() {
            layers |= FilterLayerFlags::TRANSPORT_LAYER_VALID;
            wire.transport_filter = self.l4_to_wire();
        }

        wire.valid_fields = layers;
        Ok(wire)
    }

    fn resolve_adapter(&self, adapters: Option<&TcpAdapterList>) -> Result<AdapterHandle> {
        if let Some(index) = self.interface_index {
            let list = adapters.ok_or(Error::AdapterOutOfRange(index))?;
            if index >= list.count() {
                return Err(Error::AdapterOutOfRange(index));
            }
            return Ok(list.adapter_handle[index]);
        }
        Ok(self.adapter_handle.unwrap_or(AdapterHandle::ANY))
    }

    fn l2_to_wire(&self) -> DataLinkLayerFilter {
        let mut eth = Eth8023Filter::default();
        let mut valid = Eth802_3FilterFlags::default();

        if let Some(mac) = self.source_mac {
            valid |= Eth802_3FilterFlags::ETH_802_3_SRC_ADDRESS;
            eth.src_address = mac;
        }
        if let Some(mac) = self.dest_mac {
            valid |= Eth802_3FilterFlags::ETH_802_3_DEST_ADDRESS;
            eth.dest_address = mac;
        }
        if let Some(ether_type) = self.ether_type {
            valid |= Eth802_3FilterFlags::ETH_802_3_PROTOCOL;
            eth.protocol = ether_type;
        }
        eth.valid_fields = valid;

        DataLinkLayerFilter {
            union_selector: ETH_802_3,
            data_link_layer: DataLinkLayerFilterUnion {
                eth_8023_filter: eth,
            },
        }
    }

    /// The IP family of the network layer: v4 unless the first specified
    /// address says otherwise.
    fn l3_family_is_v4(&self) -> bool {
        self.source_address
            .as_ref()
            .or(self.dest_address.as_ref())
            .map(AddressFilter::family_is_v4)
            .unwrap_or(true)
    }

    fn l3_to_wire(&self) -> Result<NetworkLayerFilter> {
        if self.l3_family_is_v4() {
            let mut ipv4 = IpV4Filter::default();
            let mut valid = IpV4FilterFlags::default();

            if let Some(address) = &self.source_address {
                valid |= IpV4FilterFlags::IP_V4_FILTER_SRC_ADDRESS;
                ipv4.src_address = v4_address_to_wire(address)?;
            }
            if let Some(address) = &self.dest_address {
                valid |= IpV4FilterFlags::IP_V4_FILTER_DEST_ADDRESS;
                ipv4.dest_address = v4_address_to_wire(address)?;
            }
            if let Some(protocol) = self.protocol {
                valid |= IpV4FilterFlags::IP_V4_FILTER_PROTOCOL;
                ipv4.protocol = protocol;
            }
            ipv4.valid_fields = valid;

            Ok(NetworkLayerFilter {
                union_selector: IPV4,
                network_layer: NetworkLayerFilterUnion { ipv4 },
            })
        } else {
            let mut ipv6 = IpV6Filter::default();
            let mut valid = IpV6FilterFlags::default();

            if let Some(address) = &self.source_address {
                valid |= IpV6FilterFlags::IP_V6_FILTER_SRC_ADDRESS;
                ipv6.src_address = v6_address_to_wire(address)?;
            }
            if let Some(address) = &self.dest_address {
                valid |= IpV6FilterFlags::IP_V6_FILTER_DEST_ADDRESS;
                ipv6.dest_address = v6_address_to_wire(address)?;
            }
            if let Some(protocol) = self.protocol {
                valid |= IpV6FilterFlags::IP_V6_FILTER_PROTOCOL;
                ipv6.protocol = protocol;
            }
            ipv6.valid_fields = valid;

            Ok(NetworkLayerFilter {
                union_selector: IPV6,
                network_layer: NetworkLayerFilterUnion { ipv6 },
            })
        }
    }

    /// The transport selector follows the rule's protocol: tcp-or-udp for
    /// TCP/UDP (and for port-only rules), icmp otherwise.
    fn l4_selector_is_tcpudp(&self) -> bool {
        match self.protocol {
            Some(IPPROTO_TCP) | Some(IPPROTO_UDP) => true,
            Some(IPPROTO_ICMP) | Some(IPPROTO_ICMPV6) => false,
            Some(_) => self.icmp_type.is_none() && self.icmp_code.is_none(),
            None => self.icmp_type.is_none() && self.icmp_code.is_none(),
        }
    }

    fn l4_to_wire(&self) -> TransportLayerFilter {
        if self.l4_selector_is_tcpudp() {
            let mut tcp_udp = TcpUdpFilter::default();
            let mut valid = TcpUdpFilterFlags::default();

            if let Some((start, end)) = self.source_port {
                valid |= TcpUdpFilterFlags::TCPUDP_SRC_PORT;
                tcp_udp.source_port = PortRange {
                    start_range: start,
                    end_range: end,
                };
            }
            if let Some((start, end)) = self.dest_port {
                valid |= TcpUdpFilterFlags::TCPUDP_DEST_PORT;
                tcp_udp.dest_port = PortRange {
                    start_range: start,
                    end_range: end,
                };
            }
            if let Some(mask) = self.tcp_flags {
                valid |= TcpUdpFilterFlags::TCPUDP_TCP_FLAGS;
                tcp_udp.tcp_flags = mask;
            }
            tcp_udp.valid_fields = valid;

            TransportLayerFilter {
                union_selector: TCPUDP,
                transport_layer: TransportLayerFilterUnion { tcp_udp },
            }
        } else {
            let mut icmp = IcmpFilter::default();
            let mut valid = IcmpFilterFlags::default();

            if let Some((start, end)) = self.icmp_type {
                valid |= IcmpFilterFlags::ICMP_TYPE;
                icmp.type_range = ByteRange {
                    start_range: start,
                    end_range: end,
                };
            }
            if let Some((start, end)) = self.icmp_code {
                valid |= IcmpFilterFlags::ICMP_CODE;
                icmp.code_range = ByteRange {
                    start_range: start,
                    end_range: end,
                };
            }
            icmp.valid_fields = valid;

            TransportLayerFilter {
                union_selector: ICMP,
                transport_layer: TransportLayerFilterUnion { icmp },
            }
        }
    }

    /// Reconstructs a rule and its counters from a read-back row.
    pub fn from_wire(wire: &StaticFilter) -> Result<(Self, RuleStats)> {
        let mut rule = FilterRule::new()
            .direction(RuleDirection::from_wire(wire.direction_flags))
            .action(RuleAction::from_wire(wire.filter_action)?);

        let adapter = wire.adapter_handle;
        if !adapter.is_any() {
            rule.adapter_handle = Some(adapter);
        }

        let layers = wire.valid_fields;

        if layers.contains(FilterLayerFlags::DATA_LINK_LAYER_VALID) {
            rule.l2_from_wire(wire.data_link_filter);
        }
        if layers.contains(FilterLayerFlags::NETWORK_LAYER_VALID) {
            rule.l3_from_wire(wire.network_filter)?;
        }
        if layers.contains(FilterLayerFlags::TRANSPORT_LAYER_VALID) {
            rule.l4_from_wire(wire.transport_filter);
        }

        let stats = RuleStats {
            last_reset: wire.last_reset,
            packets_in: wire.packets_in,
            bytes_in: wire.bytes_in,
            packets_out: wire.packets_out,
            bytes_out: wire.bytes_out,
        };

        Ok((rule, stats))
    }

    fn l2_from_wire(&mut self, wire: DataLinkLayerFilter) {
        if wire.union_selector != ETH_802_3 {
            return;
        }
        let eth = unsafe { wire.data_link_layer.eth_8023_filter };
        let valid = eth.valid_fields;

        if valid.contains(Eth802_3FilterFlags::ETH_802_3_SRC_ADDRESS) {
            self.source_mac = Some(eth.src_address);
        }
        if valid.contains(Eth802_3FilterFlags::ETH_802_3_DEST_ADDRESS) {
            self.dest_mac = Some(eth.dest_address);
        }
        if valid.contains(Eth802_3FilterFlags::ETH_802_3_PROTOCOL) {
            self.ether_type = Some(eth.protocol);
        }
    }

    fn l3_from_wire(&mut self, wire: NetworkLayerFilter) -> Result<()> {
        match wire.union_selector {
            IPV4 => {
                let ipv4 = unsafe { wire.network_layer.ipv4 };
                let valid = ipv4.valid_fields;

                if valid.contains(IpV4FilterFlags::IP_V4_FILTER_SRC_ADDRESS) {
                    self.source_address = Some(v4_address_from_wire(ipv4.src_address)?);
                }
                if valid.contains(IpV4FilterFlags::IP_V4_FILTER_DEST_ADDRESS) {
                    self.dest_address = Some(v4_address_from_wire(ipv4.dest_address)?);
                }
                if valid.contains(IpV4FilterFlags::IP_V4_FILTER_PROTOCOL) {
                    self.protocol = Some(ipv4.protocol);
                }
            }
            IPV6 => {
                let ipv6 = unsafe { wire.network_layer.ipv6 };
                let valid = ipv6.valid_fields;

                if valid.contains(IpV6FilterFlags::IP_V6_FILTER_SRC_ADDRESS) {
                    self.source_address = Some(v6_address_from_wire(ipv6.src_address)?);
                }
                if valid.contains(IpV6FilterFlags::IP_V6_FILTER_DEST_ADDRESS) {
                    self.dest_address = Some(v6_address_from_wire(ipv6.dest_address)?);
                }
                if valid.contains(IpV6FilterFlags::IP_V6_FILTER_PROTOCOL) {
                    self.protocol = Some(ipv6.protocol);
                }
            }
            _ => return Err(Error::InvalidArgument),
        }
        Ok(())
    }

    fn l4_from_wire(&mut self, wire: TransportLayerFilter) {
        match wire.union_selector {
            TCPUDP => {
                let tcp_udp = unsafe { wire.transport_layer.tcp_udp };
                let valid = tcp_udp.valid_fields;

                if valid.contains(TcpUdpFilterFlags::TCPUDP_SRC_PORT) {
                    let range = tcp_udp.source_port;
                    self.source_port = Some((range.start_range, range.end_range));
                }
                if valid.contains(TcpUdpFilterFlags::TCPUDP_DEST_PORT) {
                    let range = tcp_udp.dest_port;
                    self.dest_port = Some((range.start_range, range.end_range));
                }
                if valid.contains(TcpUdpFilterFlags::TCPUDP_TCP_FLAGS) {
                    self.tcp_flags = Some(tcp_udp.tcp_flags);
                }
            }
            ICMP => {
                let icmp = unsafe { wire.transport_layer.icmp };
                let valid = icmp.valid_fields;

                if valid.contains(IcmpFilterFlags::ICMP_TYPE) {
                    let range = icmp.type_range;
                    self.icmp_type = Some((range.start_range, range.end_range));
                }
                if valid.contains(IcmpFilterFlags::ICMP_CODE) {
                    let range = icmp.code_range;
                    self.icmp_code = Some((range.start_range, range.end_range));
                }
            }
            _ => {}
        }
    }
}

fn v4_address_to_wire(address: &AddressFilter) -> Result<IpAddressV4> {
    match address {
        AddressFilter::Subnet(IpNetwork::V4(network)) => Ok(IpAddressV4 {
            address_type: IP_SUBNET_V4_TYPE,
            address: IpAddressV4Union {
                ip_subnet: IpSubnetV4 {
                    ip: in_addr_from_ipv4(network.network()),
                    ip_mask: in_addr_from_ipv4(network.mask()),
                },
            },
        }),
        AddressFilter::Range(IpAddr::V4(start), IpAddr::V4(end)) => Ok(IpAddressV4 {
            address_type: IP_RANGE_V4_TYPE,
            address: IpAddressV4Union {
                ip_range: IpRangeV4 {
                    start_ip: in_addr_from_ipv4(*start),
                    end_ip: in_addr_from_ipv4(*end),
                },
            },
        }),
        _ => Err(Error::InvalidArgument),
    }
}

fn v4_address_from_wire(wire: IpAddressV4) -> Result<AddressFilter> {
    match wire.address_type {
        IP_SUBNET_V4_TYPE => {
            let subnet = unsafe { wire.address.ip_subnet };
            let network = Ipv4Network::with_netmask(
                ipv4_from_in_addr(subnet.ip),
                ipv4_from_in_addr(subnet.ip_mask),
            )
            .map_err(|_| Error::InvalidArgument)?;
            Ok(AddressFilter::Subnet(IpNetwork::V4(network)))
        }
        IP_RANGE_V4_TYPE => {
            let range = unsafe { wire.address.ip_range };
            Ok(AddressFilter::Range(
                IpAddr::V4(ipv4_from_in_addr(range.start_ip)),
                IpAddr::V4(ipv4_from_in_addr(range.end_ip)),
            ))
        }
        _ => Err(Error::InvalidArgument),
    }
}

fn v6_address_to_wire(address: &AddressFilter) -> Result<IpAddressV6> {
    match address {
        AddressFilter::Subnet(IpNetwork::V6(network)) => Ok(IpAddressV6 {
            address_type: IP_SUBNET_V6_TYPE,
            address: IpAddressV6Union {
                ip_subnet: IpSubnetV6 {
                    ip: in6_addr_from_ipv6(network.network()),
                    ip_mask: in6_addr_from_ipv6(network.mask()),
                },
            },
        }),
        AddressFilter::Range(IpAddr::V6(start), IpAddr::V6(end)) => Ok(IpAddressV6 {
            address_type: IP_RANGE_V6_TYPE,
            address: IpAddressV6Union {
                ip_range: IpRangeV6 {
                    start_ip: in6_addr_from_ipv6(*start),
                    end_ip: in6_addr_from_ipv6(*end),
                },
            },
        }),
        _ => Err(Error::InvalidArgument),
    }
}

fn v6_address_from_wire(wire: IpAddressV6) -> Result<AddressFilter> {
    match wire.address_type {
        IP_SUBNET_V6_TYPE => {
            let subnet = unsafe { wire.address.ip_subnet };
            let network = Ipv6Network::with_netmask(
                ipv6_from_in6_addr(subnet.ip),
                ipv6_from_in6_addr(subnet.ip_mask),
            )
            .map_err(|_| Error::InvalidArgument)?;
            Ok(AddressFilter::Subnet(IpNetwork::V6(network)))
        }
        IP_RANGE_V6_TYPE => {
            let range = unsafe { wire.address.ip_range };
            Ok(AddressFilter::Range(
                IpAddr::V6(ipv6_from_in6_addr(range.start_ip)),
                IpAddr::V6(ipv6_from_in6_addr(range.end_ip)),
            ))
        }
        _ => Err(Error::InvalidArgument),
    }
}
