//! Static filter table management.
//!
//! [`FilterTable`] owns a user-space mirror of the driver's rule table and
//! keeps the two in lockstep: whole-table installs serialize the mirror into
//! the driver's contiguous layout, per-rule mutations issue the dedicated
//! ioctl first and only touch the mirror once the driver accepted the change.
//! The kernel table is process-wide; the mirror belongs to this object.

use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::abi::*;
use crate::api::DriverIo;
use crate::rules::{FilterRule, RuleStats};
use crate::{Error, Result};

/// Size of the serialized table header (`table_size` plus padding).
const TABLE_HEADER_SIZE: usize = size_of::<StaticFilterTable<0>>();

struct TableState {
    rules: Vec<FilterRule>,
    adapters: TcpAdapterList,
}

/// Owned view of the driver's static filter table.
pub struct FilterTable<D: DriverIo> {
    api: Arc<D>,
    state: Mutex<TableState>,
}

impl<D: DriverIo> std::fmt::Debug for FilterTable<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterTable").finish_non_exhaustive()
    }
}

impl<D: DriverIo> FilterTable<D> {
    /// Creates the table manager, applying the two kernel cache toggles and
    /// capturing the adapter list used to resolve interface indices.
    pub fn new(api: Arc<D>, filter_cache: bool, fragment_cache: bool) -> Result<Self> {
        if !api.is_driver_loaded() {
            return Err(Error::NotInitialized);
        }

        api.set_packet_filter_cache_state(filter_cache)?;
        api.set_packet_fragment_cache_state(fragment_cache)?;

        let adapters = api.tcpip_bound_adapters()?;

        Ok(Self {
            api,
            state: Mutex::new(TableState {
                rules: Vec::new(),
                adapters,
            }),
        })
    }

    /// Re-captures the adapter list used to resolve interface indices.
    pub fn refresh_adapters(&self) -> Result<()> {
        let adapters = self.api.tcpip_bound_adapters()?;
        self.state.lock().adapters = adapters;
        Ok(())
    }

    /// Serializes `rules` and installs them as the complete driver table.
    /// The last rule is conventionally a terminal default rule; installing an
    /// empty slice means "no filters".
    pub fn install(&self, rules: &[FilterRule]) -> Result<()> {
        let mut state = self.state.lock();
        if rules.is_empty() {
            self.api.set_packet_filter_table(None)?;
        } else {
            let bytes = serialize_table(rules, &state.adapters)?;
            self.api.set_packet_filter_table(Some(&bytes))?;
        }
        state.rules = rules.to_vec();
        Ok(())
    }

    /// Clears the installed table and the mirror.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.api.reset_packet_filter_table()?;
        state.rules.clear();
        Ok(())
    }

    /// Number of rules currently installed in the driver.
    pub fn size(&self) -> Result<usize> {
        self.api.packet_filter_table_size()
    }

    /// Prepends `rule` to the installed table.
    pub fn add_front(&self, rule: FilterRule) -> Result<()> {
        let mut state = self.state.lock();
        let wire = rule.to_wire(Some(&state.adapters))?;
        self.api.add_filter_front(&wire)?;
        state.rules.insert(0, rule);
        Ok(())
    }

    /// Appends `rule` to the installed table.
    pub fn add_back(&self, rule: FilterRule) -> Result<()> {
        let mut state = self.state.lock();
        let wire = rule.to_wire(Some(&state.adapters))?;
        self.api.add_filter_back(&wire)?;
        state.rules.push(rule);
        Ok(())
    }

    /// Inserts `rule` at `position` in the installed table.
    pub fn insert_at(&self, rule: FilterRule, position: usize) -> Result<()> {
        let mut state = self.state.lock();
        if position > state.rules.len() {
            return Err(Error::InvalidArgument);
        }
        let wire = rule.to_wire(Some(&state.adapters))?;
        self.api.insert_filter(&wire, position as u32)?;
        state.rules.insert(position, rule);
        Ok(())
    }

    /// Removes the rule at `position` from the installed table.
    pub fn remove_at(&self, position: usize) -> Result<()> {
        let mut state = self.state.lock();
        if position >= state.rules.len() {
            return Err(Error::InvalidArgument);
        }
        self.api.remove_filter(position as u32)?;
        state.rules.remove(position);
        Ok(())
    }

    /// Removes every mirrored rule matching `predicate`, keeping the driver
    /// table in lockstep. Rules the driver refuses to remove stay in place.
    pub fn remove_if(&self, predicate: impl Fn(&FilterRule) -> bool) -> Result<usize> {
        let mut state = self.state.lock();
        let mut removed = 0usize;
        let mut position = 0usize;
        while position < state.rules.len() {
            if predicate(&state.rules[position]) {
                self.api.remove_filter(position as u32)?;
                state.rules.remove(position);
                removed += 1;
            } else {
                position += 1;
            }
        }
        Ok(removed)
    }

    /// The mirrored rules as last synchronized with the driver.
    pub fn rules(&self) -> Vec<FilterRule> {
        self.state.lock().rules.clone()
    }

    /// Reads the installed table back, including per-rule counters, and
    /// resynchronizes the mirror.
    pub fn get_table(&self) -> Result<Vec<(FilterRule, RuleStats)>> {
        self.read_back(false)
    }

    /// Like [`Self::get_table`] but atomically resets the counters.
    pub fn get_table_reset_stats(&self) -> Result<Vec<(FilterRule, RuleStats)>> {
        self.read_back(true)
    }

    /// Toggles the kernel filter-match cache.
    pub fn set_filter_cache_enabled(&self, enabled: bool) -> Result<()> {
        self.api.set_packet_filter_cache_state(enabled)
    }

    /// Toggles the kernel fragment cache.
    pub fn set_fragment_cache_enabled(&self, enabled: bool) -> Result<()> {
        self.api.set_packet_fragment_cache_state(enabled)
    }

    fn read_back(&self, reset_stats: bool) -> Result<Vec<(FilterRule, RuleStats)>> {
        let mut state = self.state.lock();

        let mut capacity = self
            .api
            .packet_filter_table_size()
            .map(|rows| TABLE_HEADER_SIZE + rows * size_of::<StaticFilter>())
            .unwrap_or(TABLE_HEADER_SIZE);

        // The table can grow between the size query and the read; retry with
        // a larger buffer until the driver accepts it.
        let mut buffer = vec![0u8; capacity.max(TABLE_HEADER_SIZE)];
        loop {
            match self.api.read_packet_filter_table(&mut buffer, reset_stats) {
                Ok(()) => break,
                Err(Error::BufferTooSmall) => {
                    capacity = capacity.max(TABLE_HEADER_SIZE) * 2
                        + size_of::<StaticFilter>();
                    buffer.resize(capacity, 0);
                }
                Err(error) => return Err(error),
            }
        }

        let entries = parse_table(&buffer)?;
        state.rules = entries.iter().map(|(rule, _)| *rule).collect();
        Ok(entries)
    }
}

/// Serializes `rules` into the driver's contiguous table layout: the 8-byte
/// header followed by one [`StaticFilter`] row per rule.
fn serialize_table(rules: &[FilterRule], adapters: &TcpAdapterList) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; TABLE_HEADER_SIZE + rules.len() * size_of::<StaticFilter>()];
    bytes[..4].copy_from_slice(&(rules.len() as u32).to_ne_bytes());

    for (index, rule) in rules.iter().enumerate() {
        let wire = rule.to_wire(Some(adapters))?;
        let offset = TABLE_HEADER_SIZE + index * size_of::<StaticFilter>();
        // The byte buffer carries no alignment guarantees for the row type.
        unsafe {
            ptr::write_unaligned(bytes.as_mut_ptr().add(offset) as *mut StaticFilter, wire);
        }
    }

    Ok(bytes)
}

/// Parses a serialized table back into rules plus counters.
fn parse_table(bytes: &[u8]) -> Result<Vec<(FilterRule, RuleStats)>> {
    if bytes.len() < TABLE_HEADER_SIZE {
        return Err(Error::InvalidArgument);
    }
    let count = u32::from_ne_bytes(bytes[..4].try_into().unwrap()) as usize;
    if bytes.len() < TABLE_HEADER_SIZE + count * size_of::<StaticFilter>() {
        return Err(Error::InvalidArgument);
    }

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let offset = TABLE_HEADER_SIZE + index * size_of::<StaticFilter>();
        let wire = unsafe {
            ptr::read_unaligned(bytes.as_ptr().add(offset) as *const StaticFilter)
        };
        entries.push(FilterRule::from_wire(&wire)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleAction, RuleDirection};
    use crate::testing::MockDriver;

    fn table_with_mock() -> (Arc<MockDriver>, FilterTable<MockDriver>) {
        let api = Arc::new(MockDriver::new());
        let table = FilterTable::new(api.clone(), true, true).unwrap();
        (api, table)
    }

    #[test]
    fn new_requires_loaded_driver() {
        let api = Arc::new(MockDriver::unloaded());
        assert_eq!(
            FilterTable::new(api, false, false).unwrap_err(),
            Error::NotInitialized
        );
    }

    #[test]
    fn install_and_read_back_field_by_field() {
        // Scenario: block outbound SMTP, allow inbound ICMP, terminal pass.
        let block_smtp = FilterRule::new()
            .direction(RuleDirection::Out)
            .action(RuleAction::Drop)
            .dest_port(25, 25);
        let allow_icmp = FilterRule::new()
            .direction(RuleDirection::In)
            .action(RuleAction::Pass)
            .protocol(1);
        let terminal = FilterRule::terminal(RuleAction::Pass);

        let (_, table) = table_with_mock();
        table.install(&[block_smtp, allow_icmp, terminal]).unwrap();
        assert_eq!(table.size().unwrap(), 3);

        let wire_rows: Vec<_> = table
            .rules()
            .iter()
            .map(|rule| rule.to_wire(None).unwrap())
            .collect();
        assert_eq!(
            { wire_rows[0].valid_fields },
            FilterLayerFlags::TRANSPORT_LAYER_VALID
        );
        assert_eq!(
            { wire_rows[1].valid_fields },
            FilterLayerFlags::NETWORK_LAYER_VALID
        );
        assert_eq!({ wire_rows[2].valid_fields }, FilterLayerFlags::default());

        let read_back = table.get_table().unwrap();
        assert_eq!(read_back.len(), 3);
        assert_eq!(read_back[0].0, block_smtp);
        assert_eq!(read_back[1].0, allow_icmp);
        assert_eq!(read_back[2].0, terminal);
    }

    #[test]
    fn terminal_rule_survives_with_nonzero_counters() {
        let rules = [
            FilterRule::new().protocol(6).dest_port(443, 443),
            FilterRule::terminal(RuleAction::Drop),
        ];

        let (api, table) = table_with_mock();
        table.install(&rules).unwrap();

        // The driver accounts traffic against the rules; counters come back
        // non-zero while the rules themselves are unchanged.
        api.bump_filter_stats(7, 4242);

        let read_back = table.get_table().unwrap();
        assert_eq!(read_back[0].0, rules[0]);
        assert_eq!(read_back[1].0, rules[1]);
        assert_eq!(read_back[1].1.packets_in, 7);
        assert_eq!(read_back[1].1.bytes_in, 4242);
    }

    #[test]
    fn mutations_keep_mirror_in_lockstep() {
        let (_, table) = table_with_mock();
        let terminal = FilterRule::terminal(RuleAction::Pass);
        table.install(&[terminal]).unwrap();

        let front = FilterRule::new().protocol(17).action(RuleAction::Drop);
        table.add_front(front).unwrap();
        let back = FilterRule::terminal(RuleAction::Drop);
        table.add_back(back).unwrap();
        let middle = FilterRule::new().protocol(6);
        table.insert_at(middle, 1).unwrap();

        assert_eq!(table.rules(), vec![front, middle, terminal, back]);
        assert_eq!(table.size().unwrap(), 4);

        table.remove_at(1).unwrap();
        assert_eq!(table.rules(), vec![front, terminal, back]);

        let removed = table
            .remove_if(|rule| rule.get_action() == RuleAction::Drop)
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(table.rules(), vec![terminal]);
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn insert_out_of_range_leaves_mirror_untouched() {
        let (_, table) = table_with_mock();
        table
            .install(&[FilterRule::terminal(RuleAction::Pass)])
            .unwrap();

        let result = table.insert_at(FilterRule::new().protocol(6), 5);
        assert_eq!(result.unwrap_err(), Error::InvalidArgument);
        assert_eq!(table.rules().len(), 1);
        assert_eq!(table.size().unwrap(), 1);
    }

    #[test]
    fn read_back_grows_buffer() {
        let (api, table) = table_with_mock();
        let rules: Vec<_> = (0..6)
            .map(|port| FilterRule::new().dest_port(port, port))
            .chain([FilterRule::terminal(RuleAction::Pass)])
            .collect();
        table.install(&rules).unwrap();

        // Make the size query lie low so the first read comes back short.
        api.understate_table_size();
        let read_back = table.get_table().unwrap();
        assert_eq!(read_back.len(), rules.len());
    }

    #[test]
    fn serialize_layout_matches_wire_format() {
        let rules = [FilterRule::terminal(RuleAction::Pass)];
        let bytes = serialize_table(&rules, &TcpAdapterList::default()).unwrap();
        assert_eq!(
            bytes.len(),
            TABLE_HEADER_SIZE + size_of::<StaticFilter>()
        );
        assert_eq!(u32::from_ne_bytes(bytes[..4].try_into().unwrap()), 1);

        let parsed = parse_table(&bytes).unwrap();
        assert_eq!(parsed[0].0, rules[0]);
    }
}
