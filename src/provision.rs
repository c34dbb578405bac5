// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Provisioned, immutable platform configuration.
//!
//! A [`Provisioning`] holds everything the trust core needs that is not read
//! from untrusted flash: the root key hashes, the flash layout of each device,
//! size limits per payload type, the SMBus topology, and where persistent
//! policy lives in NVM.
//!
//! With the `serde` feature, this type can be loaded from a JSON file; flash
//! offsets may be written in hex (`"0x2ff0000"`) and digests as hex strings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hardware::flash::Region;
use crate::hardware::Device;

/// The number of SMBus relays behind the controller.
pub const SMBUS_BUS_COUNT: usize = 3;

/// The number of rules (device addresses) each SMBus relay can hold.
pub const SMBUS_RULES_PER_BUS: usize = 16;

/// Offsets of the three image copies on one flash device.
///
/// `active` is the address of the signed active PFM, not of the firmware it
/// describes; the firmware's regions are named by that PFM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Layout {
    /// The signed active PFM.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub active: u32,

    /// The signed recovery capsule.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub recovery: u32,

    /// The signed staging (pending update) capsule.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub staging: u32,

    /// The active and recovery attestation manifests, if this device
    /// carries them.
    #[cfg_attr(feature = "serde", serde(default))]
    pub afm: Option<AfmLayout>,
}

/// Offsets of the attestation manifest pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AfmLayout {
    /// The signed active AFM. The slot is [`AFM_SLOT_LEN`] bytes long.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub active: u32,

    /// The signed capsule wrapping the recovery AFM.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub recovery: u32,
}

/// The length of the active AFM slot, which is erased as a unit.
pub const AFM_SLOT_LEN: u32 = 0x20000;

impl AfmLayout {
    /// Returns the flash region of the active AFM slot.
    pub fn active_slot(&self) -> Region {
        Region::new(self.active, AFM_SLOT_LEN)
    }
}

/// Per-type size limits applied to Block0 before anything is hashed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Limits {
    /// The largest PCH update capsule, including its 1 KiB signature.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub max_pch_capsule: u32,

    /// The largest BMC update capsule, including its 1 KiB signature.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub max_bmc_capsule: u32,

    /// The exact protected-content length of a CPLD update capsule.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_radix",
            serialize_with = "crate::serde::se_hex"
        )
    )]
    pub cpld_capsule_len: u32,

    /// The largest content-type discriminant this platform accepts.
    pub max_pc_type: u8,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_pch_capsule: 0x100_0000,
            max_bmc_capsule: 0x200_0000,
            cpld_capsule_len: 128 + 0x5_8000,
            max_pc_type: 6,
        }
    }
}

/// Word offsets of persistent policy in NVM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NvmLayout {
    /// First word of the key cancellation table; four words per content
    /// type, for every type up to [`Limits::max_pc_type`].
    pub key_cancellation: u32,

    /// First word of the trust state table; one word per [`Device`].
    pub trust_state: u32,

    /// First word of the SVN floors; two words per [`Device`], followed by
    /// two for the AFM.
    pub svn: u32,
}

impl Default for NvmLayout {
    fn default() -> Self {
        Self {
            key_cancellation: 0,
            trust_state: 32,
            svn: 34,
        }
    }
}

/// The static SMBus topology: the device address behind every rule slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SmbusTopology {
    /// `addresses[bus_id - 1][rule_id - 1]` is the 8-bit address of the
    /// device a rule may target.
    pub addresses: [[u8; SMBUS_RULES_PER_BUS]; SMBUS_BUS_COUNT],
}

impl SmbusTopology {
    /// Returns the device address for one-based `bus_id` and `rule_id`, if
    /// both are in range.
    pub fn address(&self, bus_id: u8, rule_id: u8) -> Option<u8> {
        let bus = self.addresses.get(usize::from(bus_id).checked_sub(1)?)?;
        bus.get(usize::from(rule_id).checked_sub(1)?).copied()
    }
}

/// The complete provisioned configuration of a controller.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Provisioning {
    /// SHA-256 of the big-endian `X || Y` of the P-256 root key.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_hex_array",
            serialize_with = "crate::serde::se_hex_array"
        )
    )]
    pub root_key_hash_256: [u8; 32],

    /// SHA-384 of the big-endian `X || Y` of the P-384 root key.
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "crate::serde::de_hex_array",
            serialize_with = "crate::serde::se_hex_array"
        )
    )]
    pub root_key_hash_384: [u8; 48],

    /// The BMC flash layout.
    pub bmc: Layout,

    /// The PCH flash layout.
    pub pch: Layout,

    /// Payload size limits.
    #[cfg_attr(feature = "serde", serde(default))]
    pub limits: Limits,

    /// The SMBus topology.
    #[cfg_attr(feature = "serde", serde(default))]
    pub smbus: SmbusTopology,

    /// Where persistent policy lives.
    #[cfg_attr(feature = "serde", serde(default))]
    pub nvm: NvmLayout,
}

impl Provisioning {
    /// Returns the layout of `device`.
    pub fn layout(&self, device: Device) -> &Layout {
        match device {
            Device::Bmc => &self.bmc,
            Device::Pch => &self.pch,
        }
    }
}

#[cfg(all(test, feature = "serde"))]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_json() {
        let json = r#"{
            "root_key_hash_256": "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f",
            "root_key_hash_384": "0x000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f",
            "bmc": { "active": "0x80000", "recovery": "0x2a00000", "staging": "0x4a00000" },
            "pch": {
                "active": "0x2ff0000",
                "recovery": 1,
                "staging": "0x3000000",
                "afm": { "active": "0x3400000", "recovery": "0x3420000" }
            },
            "limits": {
                "max_pch_capsule": "0x1000000",
                "max_bmc_capsule": "0x2000000",
                "cpld_capsule_len": "0x1080",
                "max_pc_type": 5
            }
        }"#;

        let prov: Provisioning = serde_json::from_str(json).unwrap();
        assert_eq!(prov.root_key_hash_256[15], 0x0f);
        assert_eq!(prov.root_key_hash_384[47], 0x0f);
        assert_eq!(prov.layout(Device::Bmc).recovery, 0x2a00000);
        assert_eq!(prov.pch.recovery, 1);
        assert_eq!(
            prov.pch.afm.unwrap().active_slot(),
            Region::new(0x3400000, 0x20000)
        );
        assert_eq!(prov.limits.max_pc_type, 5);
        assert_eq!(prov.nvm, NvmLayout::default());

        let round = serde_json::to_string(&prov).unwrap();
        assert!(round.contains("\"0x2ff0000\""));
        let again: Provisioning = serde_json::from_str(&round).unwrap();
        assert_eq!(prov, again);
    }

    #[test]
    fn bad_digest_length() {
        let json = r#"{
            "root_key_hash_256": "0001",
            "root_key_hash_384": "00",
            "bmc": { "active": 0, "recovery": 0, "staging": 0 },
            "pch": { "active": 0, "recovery": 0, "staging": 0 }
        }"#;
        assert!(serde_json::from_str::<Provisioning>(json).is_err());
    }

    #[test]
    fn smbus_topology() {
        let mut smbus = SmbusTopology::default();
        smbus.addresses[1][2] = 0xb0;
        assert_eq!(smbus.address(2, 3), Some(0xb0));
        assert_eq!(smbus.address(0, 1), None);
        assert_eq!(smbus.address(1, 0), None);
        assert_eq!(smbus.address(4, 1), None);
        assert_eq!(smbus.address(1, 17), None);
    }
}
