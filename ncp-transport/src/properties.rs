// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command and property key constants (spec §6): "a semantic list, not an
//! exhaustive dictionary". The two values spec §8's literal scenarios pin
//! down exactly (`ncp-version` = `0x52`, `net-role` = `0x36`) are kept at
//! those values; the rest are assigned locally in the same numbering style
//! and are representative rather than a claim to match any particular
//! upstream NCP firmware's dictionary.

use num_derive::FromPrimitive;

/// Spinel commands the core issues or receives (spec §6).
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Command {
    PropValueGet = 0x02,
    PropValueSet = 0x03,
    PropValueInsert = 0x04,
    PropValueRemove = 0x05,
    PropValueIs = 0x06,
    PropValueInserted = 0x07,
    PropValueRemoved = 0x08,
    NetClear = 0x09,
    /// Vendor dialect get/set, used for the legacy channel (spec §6, §9).
    VendorPropValueGet = 0x3c02,
    VendorPropValueSet = 0x3c03,
}

/// `host-power-state` values the host reports on entry/exit of the C9
/// lifecycle (spec §4.9).
pub const HOST_POWER_STATE_OFFLINE: u32 = 0;
pub const HOST_POWER_STATE_AWAKE: u32 = 1;
pub const HOST_POWER_STATE_LOW_POWER: u32 = 2;

pub const KEY_LAST_STATUS: u32 = 0x00;
pub const KEY_NCP_VERSION: u32 = 0x52;
pub const KEY_NET_SAVED: u32 = 0x40;
pub const KEY_NET_IF_UP: u32 = 0x41;
pub const KEY_NET_STACK_UP: u32 = 0x42;
pub const KEY_NET_ROLE: u32 = 0x36;
pub const KEY_HOST_POWER_STATE: u32 = 0x0c;
pub const KEY_ALLOW_LOCAL_NET_DATA_CHANGE: u32 = 0x4c;
pub const KEY_ASSISTING_PORTS: u32 = 0x4d;
pub const KEY_IPV6_ADDRESS_TABLE: u32 = 0x60;
pub const KEY_IPV6_MULTICAST_ADDRESS_TABLE: u32 = 0x61;
pub const KEY_IPV6_DATAGRAM_STREAM_INSECURE: u32 = 0x70;
pub const KEY_IPV6_DATAGRAM_STREAM_SECURE: u32 = 0x71;
pub const KEY_MAC_SCAN_STATE: u32 = 0x22;
pub const KEY_MAC_SCAN_MASK: u32 = 0x23;
pub const KEY_MAC_SCAN_PERIOD: u32 = 0x24;
pub const KEY_MAC_SCAN_BEACON: u32 = 0x25;
pub const KEY_DEBUG_STREAM: u32 = 0x4000;
pub const KEY_CHILD_TABLE: u32 = 0x62;
pub const KEY_VENDOR_LEGACY_ULA_PREFIX: u32 = 0x3c10;
pub const KEY_VENDOR_LEGACY_STREAM: u32 = 0x3c11;
pub const KEY_VENDOR_NETWORK_WAKE: u32 = 0x3c12;
pub const KEY_VENDOR_NETWORK_LURK: u32 = 0x3c13;
pub const KEY_VENDOR_LEGACY_WAKE: u32 = 0x3c14;
pub const KEY_VENDOR_CREDENTIAL_RECOVERY: u32 = 0x3c15;
pub const KEY_BORDER_ROUTER: u32 = 0x3c20;

/// Last-status codes in the range the supervisor treats as "the NCP reset
/// itself" (spec §4.8, §4.9, §7).
pub const STATUS_OK: u32 = 0x00;
pub const STATUS_RESET_RANGE_START: u32 = 0x72;
pub const STATUS_RESET_RANGE_END: u32 = 0x77;

pub fn is_reset_status(status: u32) -> bool {
    (STATUS_RESET_RANGE_START..=STATUS_RESET_RANGE_END).contains(&status)
}

/// Decoded `net-role` values (spec §4.8).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NetRole {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

impl NetRole {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(NetRole::Disabled),
            1 => Some(NetRole::Detached),
            2 => Some(NetRole::Child),
            3 => Some(NetRole::Router),
            4 => Some(NetRole::Leader),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_pinned_property_values() {
        assert_eq!(KEY_NCP_VERSION, 0x52);
        assert_eq!(KEY_NET_ROLE, 0x36);
    }

    #[test]
    fn net_role_decodes_router() {
        assert_eq!(NetRole::from_wire(3), Some(NetRole::Router));
        assert_eq!(NetRole::from_wire(0xff), None);
    }

    #[test]
    fn reset_range_detection() {
        assert!(is_reset_status(0x72));
        assert!(is_reset_status(0x77));
        assert!(!is_reset_status(0x71));
        assert!(!is_reset_status(STATUS_OK));
    }
}
