//! I/O control codes understood by the NDIS filter driver.
//!
//! The schedule is fixed: codes are encoded with the standard
//! `(device << 16) | (access << 14) | (index << 2) | method` formula, device
//! `0x8300`, buffered method, any access, function indices starting at
//! `0x830`. The numeric values are part of the kernel ABI and asserted by the
//! tests below.

const FILE_DEVICE_NDISRD: u32 = 0x0000_8300;
const NDISRD_IOCTL_INDEX: u32 = 0x830;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

/// Encodes one control code from device type, function index, method and
/// access, exactly as `CTL_CODE` does in the Windows DDK headers.
const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

/// Encodes the driver control code at `offset` within the NDISRD schedule.
const fn ndisrd_code(offset: u32) -> u32 {
    ctl_code(
        FILE_DEVICE_NDISRD,
        NDISRD_IOCTL_INDEX + offset,
        METHOD_BUFFERED,
        FILE_ANY_ACCESS,
    )
}

/// Queries the driver version word.
pub const IOCTL_NDISRD_GET_VERSION: u32 = ndisrd_code(0);
/// Enumerates the TCP/IP-bound adapters.
pub const IOCTL_NDISRD_GET_TCPIP_INTERFACES: u32 = ndisrd_code(1);
/// Sends a single packet towards the network interface.
pub const IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER: u32 = ndisrd_code(2);
/// Sends a single packet up to the protocol stack.
pub const IOCTL_NDISRD_SEND_PACKET_TO_MSTCP: u32 = ndisrd_code(3);
/// Reads a single queued packet.
pub const IOCTL_NDISRD_READ_PACKET: u32 = ndisrd_code(4);
/// Sets the interception mode of an adapter.
pub const IOCTL_NDISRD_SET_ADAPTER_MODE: u32 = ndisrd_code(5);
/// Discards everything queued for an adapter.
pub const IOCTL_NDISRD_FLUSH_ADAPTER_QUEUE: u32 = ndisrd_code(6);
/// Registers the per-adapter packet-arrival event.
pub const IOCTL_NDISRD_SET_EVENT: u32 = ndisrd_code(7);
/// Performs an NDIS OID set request.
pub const IOCTL_NDISRD_NDIS_SET_REQUEST: u32 = ndisrd_code(8);
/// Performs an NDIS OID get request.
pub const IOCTL_NDISRD_NDIS_GET_REQUEST: u32 = ndisrd_code(9);
/// Registers the WAN connect/disconnect event.
pub const IOCTL_NDISRD_SET_WAN_EVENT: u32 = ndisrd_code(10);
/// Registers the adapter-list-change event.
pub const IOCTL_NDISRD_SET_ADAPTER_EVENT: u32 = ndisrd_code(11);
/// Queries the number of packets queued for an adapter.
pub const IOCTL_NDISRD_ADAPTER_QUEUE_SIZE: u32 = ndisrd_code(12);
/// Reads back the interception mode of an adapter.
pub const IOCTL_NDISRD_GET_ADAPTER_MODE: u32 = ndisrd_code(13);
/// Installs a complete static filter table.
pub const IOCTL_NDISRD_SET_PACKET_FILTERS: u32 = ndisrd_code(14);
/// Clears the installed static filter table.
pub const IOCTL_NDISRD_RESET_PACKET_FILTERS: u32 = ndisrd_code(15);
/// Queries the installed table size in entries.
pub const IOCTL_NDISRD_GET_PACKET_FILTERS_TABLESIZE: u32 = ndisrd_code(16);
/// Reads back the installed table with per-rule counters.
pub const IOCTL_NDISRD_GET_PACKET_FILTERS: u32 = ndisrd_code(17);
/// Reads back the installed table and resets the counters.
pub const IOCTL_NDISRD_GET_PACKET_FILTERS_RESET_STATS: u32 = ndisrd_code(18);
/// Queries active RAS link information.
pub const IOCTL_NDISRD_GET_RAS_LINKS: u32 = ndisrd_code(19);
/// Sends a batch of packets towards the network interface.
pub const IOCTL_NDISRD_SEND_PACKETS_TO_ADAPTER: u32 = ndisrd_code(20);
/// Sends a batch of packets up to the protocol stack.
pub const IOCTL_NDISRD_SEND_PACKETS_TO_MSTCP: u32 = ndisrd_code(21);
/// Reads a batch of queued packets for one adapter.
pub const IOCTL_NDISRD_READ_PACKETS: u32 = ndisrd_code(22);
/// Registers the hardware-filter-change event.
pub const IOCTL_NDISRD_SET_ADAPTER_HWFILTER_EVENT: u32 = ndisrd_code(23);
/// Registers the primary fast-I/O shared section.
pub const IOCTL_NDISRD_INITIALIZE_FAST_IO: u32 = ndisrd_code(24);
/// Reads a batch of packets regardless of originating adapter.
pub const IOCTL_NDISRD_READ_PACKETS_UNSORTED: u32 = ndisrd_code(25);
/// Sends a cross-adapter batch towards the network interfaces.
pub const IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER_UNSORTED: u32 = ndisrd_code(26);
/// Sends a cross-adapter batch up to the protocol stack.
pub const IOCTL_NDISRD_SEND_PACKET_TO_MSTCP_UNSORTED: u32 = ndisrd_code(27);
/// Registers a secondary fast-I/O shared section.
pub const IOCTL_NDISRD_ADD_SECOND_FAST_IO_SECTION: u32 = ndisrd_code(28);
/// Queries the effective intermediate-buffer pool size.
pub const IOCTL_NDISRD_QUERY_IB_POOL_SIZE: u32 = ndisrd_code(29);
/// Prepends one rule to the installed filter table.
pub const IOCTL_NDISRD_ADD_FLT_FRONT: u32 = ndisrd_code(30);
/// Appends one rule to the installed filter table.
pub const IOCTL_NDISRD_ADD_FLT_BACK: u32 = ndisrd_code(31);
/// Inserts one rule at a position in the installed filter table.
pub const IOCTL_NDISRD_INSERT_FLT: u32 = ndisrd_code(32);
/// Removes the rule at a position from the installed filter table.
pub const IOCTL_NDISRD_REMOVE_FLT: u32 = ndisrd_code(33);
/// Toggles the kernel filter-match cache.
pub const IOCTL_NDISRD_SET_FLT_CACHE_STATE: u32 = ndisrd_code(34);
/// Toggles the kernel fragment-reassembly cache.
pub const IOCTL_NDISRD_SET_FRAG_CACHE_STATE: u32 = ndisrd_code(35);

#[cfg(test)]
mod tests {
    use super::*;

    // The driver dispatches on these exact numbers; any drift here is an ABI
    // break, so the whole schedule is pinned.
    #[test]
    fn schedule_is_stable() {
        let expected: &[(u32, u32)] = &[
            (IOCTL_NDISRD_GET_VERSION, 0),
            (IOCTL_NDISRD_GET_TCPIP_INTERFACES, 1),
            (IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER, 2),
            (IOCTL_NDISRD_SEND_PACKET_TO_MSTCP, 3),
            (IOCTL_NDISRD_READ_PACKET, 4),
            (IOCTL_NDISRD_SET_ADAPTER_MODE, 5),
            (IOCTL_NDISRD_FLUSH_ADAPTER_QUEUE, 6),
            (IOCTL_NDISRD_SET_EVENT, 7),
            (IOCTL_NDISRD_NDIS_SET_REQUEST, 8),
            (IOCTL_NDISRD_NDIS_GET_REQUEST, 9),
            (IOCTL_NDISRD_SET_WAN_EVENT, 10),
            (IOCTL_NDISRD_SET_ADAPTER_EVENT, 11),
            (IOCTL_NDISRD_ADAPTER_QUEUE_SIZE, 12),
            (IOCTL_NDISRD_GET_ADAPTER_MODE, 13),
            (IOCTL_NDISRD_SET_PACKET_FILTERS, 14),
            (IOCTL_NDISRD_RESET_PACKET_FILTERS, 15),
            (IOCTL_NDISRD_GET_PACKET_FILTERS_TABLESIZE, 16),
            (IOCTL_NDISRD_GET_PACKET_FILTERS, 17),
            (IOCTL_NDISRD_GET_PACKET_FILTERS_RESET_STATS, 18),
            (IOCTL_NDISRD_GET_RAS_LINKS, 19),
            (IOCTL_NDISRD_SEND_PACKETS_TO_ADAPTER, 20),
            (IOCTL_NDISRD_SEND_PACKETS_TO_MSTCP, 21),
            (IOCTL_NDISRD_READ_PACKETS, 22),
            (IOCTL_NDISRD_SET_ADAPTER_HWFILTER_EVENT, 23),
            (IOCTL_NDISRD_INITIALIZE_FAST_IO, 24),
            (IOCTL_NDISRD_READ_PACKETS_UNSORTED, 25),
            (IOCTL_NDISRD_SEND_PACKET_TO_ADAPTER_UNSORTED, 26),
            (IOCTL_NDISRD_SEND_PACKET_TO_MSTCP_UNSORTED, 27),
            (IOCTL_NDISRD_ADD_SECOND_FAST_IO_SECTION, 28),
            (IOCTL_NDISRD_QUERY_IB_POOL_SIZE, 29),
            (IOCTL_NDISRD_ADD_FLT_FRONT, 30),
            (IOCTL_NDISRD_ADD_FLT_BACK, 31),
            (IOCTL_NDISRD_INSERT_FLT, 32),
            (IOCTL_NDISRD_REMOVE_FLT, 33),
            (IOCTL_NDISRD_SET_FLT_CACHE_STATE, 34),
            (IOCTL_NDISRD_SET_FRAG_CACHE_STATE, 35),
        ];

        for &(code, offset) in expected {
            assert_eq!(
                code,
                (0x8300 << 16) | ((0x830 + offset) << 2),
                "ioctl at schedule offset {offset}"
            );
        }
    }

    #[test]
    fn known_values() {
        // Spot checks against the values the driver build was compiled with.
        assert_eq!(IOCTL_NDISRD_GET_VERSION, 0x8300_20c0);
        assert_eq!(IOCTL_NDISRD_READ_PACKETS, 0x8300_2118);
        assert_eq!(IOCTL_NDISRD_QUERY_IB_POOL_SIZE, 0x8300_2134);
    }
}
