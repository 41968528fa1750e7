//! Registry-side driver controls and adapter name services.
//!
//! These helpers do not need an open device handle: NDISWAN detection,
//! friendly-name resolution and the reboot-persistent driver parameters
//! (MTU decrement, startup mode, pool size) all live in the registry.

use windows::{
    core::{s, w, PCWSTR, PWSTR},
    Win32::System::Registry::{
        RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExA, RegQueryValueExW,
        RegSetValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WRITE, REG_DWORD, REG_VALUE_TYPE,
    },
    Win32::System::SystemInformation::GetVersion,
};

use super::NdisRd;
use crate::adapter::NdisWanKind;
use crate::{Error, Result};

const REGSTR_NETWORK_CONTROL_CLASS: PCWSTR =
    w!("SYSTEM\\CurrentControlSet\\Control\\Class\\{4D36E972-E325-11CE-BFC1-08002BE10318}");
const REGSTR_DRIVER_PARAMETERS: PCWSTR =
    w!("SYSTEM\\CurrentControlSet\\Services\\ndisrd\\Parameters");
const REGSTR_VAL_NAME: PCWSTR = w!("Name");
const REGSTR_VAL_MTU_DECREMENT: PCWSTR = w!("MTUDecrement");
const REGSTR_VAL_STARTUP_MODE: PCWSTR = w!("StartupMode");
const REGSTR_VAL_POOL_SIZE: PCWSTR = w!("PoolSize");

const COMPONENT_ID_NDISWANIP: &str = "ms_ndiswanip";
const COMPONENT_ID_NDISWANIPV6: &str = "ms_ndiswanipv6";
const COMPONENT_ID_NDISWANBH: &str = "ms_ndiswanbh";

const DEVICE_NDISWANIP: &str = "\\DEVICE\\NDISWANIP";
const DEVICE_NDISWANIPV6: &str = "\\DEVICE\\NDISWANIPV6";
const DEVICE_NDISWANBH: &str = "\\DEVICE\\NDISWANBH";

const USER_NDISWANIP: &str = "WAN Network Interface (IP)";
const USER_NDISWANIPV6: &str = "WAN Network Interface (IPv6)";
const USER_NDISWANBH: &str = "WAN Network Interface (BH)";

/// Whether the host reports Windows 8 / Windows 10 or later, where NDISWAN
/// interfaces are recognizable by device-name prefix alone.
fn is_modern_windows() -> bool {
    let version = unsafe { GetVersion() };
    let major = (version & 0xff) as u8;
    let minor = ((version >> 8) & 0xff) as u8;
    major > 6 || (major == 6 && minor >= 2)
}

/// Scans the network control class for a connection whose `ComponentId`
/// equals `component_id` and whose linkage exports `adapter_name`.
fn is_ndiswan_component(adapter_name: &str, component_id: &str) -> Result<bool> {
    let mut class_key = HKEY::default();
    let status = unsafe {
        RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            REGSTR_NETWORK_CONTROL_CLASS,
            0,
            KEY_READ,
            &mut class_key,
        )
    };
    if status.is_err() {
        return Err(Error::Io(status.0));
    }

    let mut found = false;
    let mut index = 0u32;
    let mut name_buffer = vec![0u16; 256];
    let mut value_buffer = vec![0u8; 256];

    loop {
        let mut name_size = name_buffer.len() as u32;
        let status = unsafe {
            RegEnumKeyExW(
                class_key,
                index,
                PWSTR::from_raw(name_buffer.as_mut_ptr()),
                &mut name_size,
                None,
                PWSTR::null(),
                None,
                None,
            )
        };
        if status.is_err() {
            break;
        }
        index += 1;

        let mut connection_key = HKEY::default();
        let status = unsafe {
            RegOpenKeyExW(
                class_key,
                PCWSTR::from_raw(name_buffer.as_ptr()),
                0,
                KEY_READ,
                &mut connection_key,
            )
        };
        if status.is_err() {
            continue;
        }

        let mut value_type = REG_VALUE_TYPE::default();
        let mut value_size = value_buffer.len() as u32;
        let status = unsafe {
            RegQueryValueExA(
                connection_key,
                s!("ComponentId"),
                None,
                Some(&mut value_type),
                Some(value_buffer.as_mut_ptr()),
                Some(&mut value_size),
            )
        };

        if status.is_ok() && ascii_value(&value_buffer[..value_size as usize]) == component_id {
            let mut linkage_key = HKEY::default();
            let status = unsafe {
                RegOpenKeyExW(connection_key, w!("Linkage"), 0, KEY_READ, &mut linkage_key)
            };
            if status.is_ok() {
                let mut export_size = value_buffer.len() as u32;
                let status = unsafe {
                    RegQueryValueExA(
                        linkage_key,
                        s!("Export"),
                        None,
                        Some(&mut value_type),
                        Some(value_buffer.as_mut_ptr()),
                        Some(&mut export_size),
                    )
                };
                if status.is_ok() {
                    let export = ascii_value(&value_buffer[..export_size as usize]);
                    found = export.eq_ignore_ascii_case(adapter_name);
                }
                unsafe {
                    RegCloseKey(linkage_key);
                }
            }
        }

        unsafe {
            RegCloseKey(connection_key);
        }

        if found {
            break;
        }
    }

    unsafe {
        RegCloseKey(class_key);
    }
    Ok(found)
}

/// Interprets a registry byte value as a zero-terminated ASCII string.
fn ascii_value(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Reads one DWORD value from the driver's parameters key.
fn read_parameter(value_name: PCWSTR) -> Option<u32> {
    let mut key = HKEY::default();
    let status = unsafe {
        RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            REGSTR_DRIVER_PARAMETERS,
            0,
            KEY_READ,
            &mut key,
        )
    };
    if status.is_err() {
        return None;
    }

    let mut value_type = REG_VALUE_TYPE::default();
    let mut value = 0u32;
    let mut size = std::mem::size_of::<u32>() as u32;
    let status = unsafe {
        RegQueryValueExW(
            key,
            value_name,
            None,
            Some(&mut value_type),
            Some(&mut value as *mut u32 as *mut u8),
            Some(&mut size),
        )
    };
    unsafe {
        RegCloseKey(key);
    }

    status.is_ok().then_some(value)
}

/// Writes one DWORD value into the driver's parameters key. Requires
/// administrator rights; takes effect after the next driver start.
fn write_parameter(value_name: PCWSTR, value: u32) -> Result<()> {
    let mut key = HKEY::default();
    let status = unsafe {
        RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            REGSTR_DRIVER_PARAMETERS,
            0,
            KEY_WRITE,
            &mut key,
        )
    };
    if status.is_err() {
        return Err(Error::Io(status.0));
    }

    let status = unsafe {
        RegSetValueExW(
            key,
            value_name,
            0,
            REG_DWORD,
            Some(value.to_ne_bytes().as_ref()),
        )
    };
    unsafe {
        RegCloseKey(key);
    }

    if status.is_ok() {
        Ok(())
    } else {
        Err(Error::Io(status.0))
    }
}

impl NdisRd {
    /// Whether `adapter_name` is the NDISWAN IPv4 interface.
    pub fn is_ndiswan_ip(adapter_name: &str) -> bool {
        if is_modern_windows() && adapter_name.contains(DEVICE_NDISWANIP) {
            return true;
        }
        is_ndiswan_component(adapter_name, COMPONENT_ID_NDISWANIP).unwrap_or(false)
    }

    /// Whether `adapter_name` is the NDISWAN IPv6 interface.
    pub fn is_ndiswan_ipv6(adapter_name: &str) -> bool {
        if is_modern_windows() && adapter_name.contains(DEVICE_NDISWANIPV6) {
            return true;
        }
        is_ndiswan_component(adapter_name, COMPONENT_ID_NDISWANIPV6).unwrap_or(false)
    }

    /// Whether `adapter_name` is the NDISWAN bridge-head interface.
    pub fn is_ndiswan_bh(adapter_name: &str) -> bool {
        if is_modern_windows() && adapter_name.contains(DEVICE_NDISWANBH) {
            return true;
        }
        is_ndiswan_component(adapter_name, COMPONENT_ID_NDISWANBH).unwrap_or(false)
    }

    /// Classifies an adapter by its internal device name.
    pub fn classify_wan_kind(adapter_name: &str) -> NdisWanKind {
        if Self::is_ndiswan_ip(adapter_name) {
            NdisWanKind::Ip
        } else if Self::is_ndiswan_ipv6(adapter_name) {
            NdisWanKind::Ipv6
        } else if Self::is_ndiswan_bh(adapter_name) {
            NdisWanKind::BridgeHead
        } else {
            NdisWanKind::None
        }
    }

    /// Resolves the user-visible connection name for an internal adapter
    /// device name.
    pub fn friendly_adapter_name(adapter_name: &str) -> Result<String> {
        match Self::classify_wan_kind(adapter_name) {
            NdisWanKind::Ip => return Ok(USER_NDISWANIP.into()),
            NdisWanKind::Ipv6 => return Ok(USER_NDISWANIPV6.into()),
            NdisWanKind::BridgeHead => return Ok(USER_NDISWANBH.into()),
            NdisWanKind::None => {}
        }

        let guid = adapter_name.replace("\\DEVICE\\", "");
        let key_path = format!(
            "SYSTEM\\CurrentControlSet\\Control\\Network\\{{4D36E972-E325-11CE-BFC1-08002BE10318}}\\{guid}\\Connection",
        );
        let mut key_path: Vec<u16> = key_path.encode_utf16().collect();
        key_path.push(0);

        let mut key = HKEY::default();
        let status = unsafe {
            RegOpenKeyExW(
                HKEY_LOCAL_MACHINE,
                PCWSTR::from_raw(key_path.as_ptr()),
                0,
                KEY_READ,
                &mut key,
            )
        };
        if status.is_err() {
            return Err(Error::Io(status.0));
        }

        let mut value_type = REG_VALUE_TYPE::default();
        let mut data = vec![0u16; 256];
        let mut data_size = (data.len() * 2) as u32;
        let status = unsafe {
            RegQueryValueExW(
                key,
                REGSTR_VAL_NAME,
                None,
                Some(&mut value_type),
                Some(data.as_mut_ptr() as *mut u8),
                Some(&mut data_size),
            )
        };
        unsafe {
            RegCloseKey(key);
        }
        if status.is_err() {
            return Err(Error::Io(status.0));
        }

        let characters = (data_size as usize / 2).min(data.len());
        let name = String::from_utf16_lossy(&data[..characters]);
        Ok(name.trim_end_matches('\0').to_owned())
    }

    /// Sets the amount subtracted from the reported MTU at driver start.
    /// Requires administrator rights and a reboot to take effect.
    pub fn set_mtu_decrement(mtu_decrement: u32) -> Result<()> {
        write_parameter(REGSTR_VAL_MTU_DECREMENT, mtu_decrement)
    }

    /// Reads the configured MTU decrement, if any.
    pub fn mtu_decrement() -> Option<u32> {
        read_parameter(REGSTR_VAL_MTU_DECREMENT)
    }

    /// Sets the mode applied to every adapter as soon as it appears in the
    /// system. Requires administrator rights and a reboot to take effect.
    pub fn set_adapters_startup_mode(mode: u32) -> Result<()> {
        write_parameter(REGSTR_VAL_STARTUP_MODE, mode)
    }

    /// Reads the configured startup mode, if any.
    pub fn adapters_startup_mode() -> Option<u32> {
        read_parameter(REGSTR_VAL_STARTUP_MODE)
    }

    /// Sets the intermediate-buffer pool size multiplier applied at driver
    /// start. Requires administrator rights and a reboot to take effect.
    pub fn set_pool_size(multiplier: u32) -> Result<()> {
        write_parameter(REGSTR_VAL_POOL_SIZE, multiplier)
    }

    /// Reads the configured pool size multiplier, if any.
    pub fn pool_size() -> Option<u32> {
        read_parameter(REGSTR_VAL_POOL_SIZE)
    }
}
