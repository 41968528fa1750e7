//! Static-filter table ioctls: whole-table install/read-back and per-rule
//! mutations.
//!
//! The whole-table paths work on serialized byte buffers because the wire
//! table is variable length (header plus `table_size` rows); the
//! [`crate::FilterTable`] component owns the serialization.

use std::ffi::c_void;
use std::mem::size_of;

use super::NdisRd;
use crate::abi::*;
use crate::{Error, Result};

impl NdisRd {
    /// Installs a serialized filter table (header plus rows). `None` installs
    /// the empty table, meaning "no filters".
    pub fn set_packet_filter_table(&self, table: Option<&[u8]>) -> Result<()> {
        match table {
            Some(bytes) => {
                if bytes.len() < size_of::<StaticFilterTable<0>>() {
                    return Err(Error::InvalidArgument);
                }
                self.control(
                    IOCTL_NDISRD_SET_PACKET_FILTERS,
                    Some(bytes.as_ptr() as *const c_void),
                    bytes.len() as u32,
                    None,
                    0,
                    None,
                    None,
                )
            }
            None => self.control(
                IOCTL_NDISRD_SET_PACKET_FILTERS,
                None,
                0,
                None,
                0,
                None,
                None,
            ),
        }
    }

    /// Clears the installed filter table.
    pub fn reset_packet_filter_table(&self) -> Result<()> {
        self.control(
            IOCTL_NDISRD_RESET_PACKET_FILTERS,
            None,
            0,
            None,
            0,
            None,
            None,
        )
    }

    /// Number of rules currently installed.
    pub fn packet_filter_table_size(&self) -> Result<usize> {
        let mut size = 0u32;
        self.control_out(IOCTL_NDISRD_GET_PACKET_FILTERS_TABLESIZE, &mut size)?;
        Ok(size as usize)
    }

    /// Reads the installed table into `out`, optionally resetting the
    /// per-rule counters. Fails with [`Error::BufferTooSmall`] when `out`
    /// cannot hold the table; callers grow and retry.
    pub fn read_packet_filter_table(&self, out: &mut [u8], reset_stats: bool) -> Result<()> {
        if out.len() < size_of::<StaticFilterTable<0>>() {
            return Err(Error::BufferTooSmall);
        }
        let code = if reset_stats {
            IOCTL_NDISRD_GET_PACKET_FILTERS_RESET_STATS
        } else {
            IOCTL_NDISRD_GET_PACKET_FILTERS
        };
        self.control(
            code,
            None,
            0,
            Some(out.as_mut_ptr() as *mut c_void),
            out.len() as u32,
            None,
            None,
        )
    }

    /// Prepends one rule to the installed table.
    pub fn add_filter_front(&self, filter: &StaticFilter) -> Result<()> {
        self.control_in(IOCTL_NDISRD_ADD_FLT_FRONT, filter)
    }

    /// Appends one rule to the installed table.
    pub fn add_filter_back(&self, filter: &StaticFilter) -> Result<()> {
        self.control_in(IOCTL_NDISRD_ADD_FLT_BACK, filter)
    }

    /// Inserts one rule at `position` in the installed table.
    pub fn insert_filter(&self, filter: &StaticFilter, position: u32) -> Result<()> {
        let payload = StaticFilterWithPosition {
            position,
            filter: *filter,
        };
        self.control_in(IOCTL_NDISRD_INSERT_FLT, &payload)
    }

    /// Removes the rule at `position` from the installed table.
    pub fn remove_filter(&self, position: u32) -> Result<()> {
        self.control_in(IOCTL_NDISRD_REMOVE_FLT, &position)
    }

    /// Toggles the kernel filter-match cache.
    pub fn set_packet_filter_cache_state(&self, enabled: bool) -> Result<()> {
        let state: u32 = enabled.into();
        self.control_in(IOCTL_NDISRD_SET_FLT_CACHE_STATE, &state)
    }

    /// Toggles the kernel fragment cache.
    pub fn set_packet_fragment_cache_state(&self, enabled: bool) -> Result<()> {
        let state: u32 = enabled.into();
        self.control_in(IOCTL_NDISRD_SET_FRAG_CACHE_STATE, &state)
    }
}
