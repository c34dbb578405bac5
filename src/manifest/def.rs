// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Manifest body definitions.
//!
//! Each definition starts with a one-byte [`DefType`]. The layouts, as
//! pseudo-Rust structs:
//! ```ignore
//! struct SpiRegion {
//!     def_type: u8, // 1
//!     protection: u8, // See `Protection`.
//!     hash_algorithm: u16, // See `RegionHash`.
//!     _: u32,
//!     start: u32,
//!     end: u32,
//!     sha256: [u8; 32], // If `RegionHash::Sha256` is set.
//!     sha384: [u8; 48], // If `RegionHash::Sha384` is set.
//! }
//!
//! struct SmbusRule {
//!     def_type: u8, // 2
//!     _: [u8; 4],
//!     bus_id: u8,
//!     rule_id: u8,
//!     device_addr: u8,
//!     whitelist: [u8; 32],
//! }
//!
//! struct FvmAddr {
//!     def_type: u8, // 3
//!     fv_type: u16,
//!     _: u8,
//!     _: u32,
//!     fvm_addr: u32,
//! }
//!
//! struct Capability {
//!     def_type: u8, // 4
//!     _: [u8; 67],
//! }
//! ```

use enumflags2::bitflags;
use enumflags2::BitFlags;

use crate::crypto::hash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashIo;
use crate::hardware::flash::Region;
use crate::io::Read as _;
use crate::manifest::Error;
use crate::wire::WireEnum as _;
use crate::Result;

wire_enum! {
    /// The type byte that opens a definition.
    pub enum DefType: u8 {
        /// A [`SpiRegion`].
        SpiRegion = 1,
        /// An [`SmbusRule`].
        SmbusRule = 2,
        /// An [`FvmAddr`].
        FvmAddr = 3,
        /// A capability definition, which carries nothing this crate uses.
        Capability = 4,
    }
}

/// The length of a SPI region definition without its hashes.
pub const SPI_REGION_MIN_LEN: u32 = 16;

/// The length of an SMBus rule definition.
pub const SMBUS_RULE_LEN: u32 = 40;

/// The length of an FVM address definition.
pub const FVM_ADDR_LEN: u32 = 12;

/// The length of a capability definition.
pub const CAPABILITY_LEN: u32 = 68;

/// Access policy bits of a SPI region.
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Protection {
    /// The device's owner may read the region.
    Read = 0b1,
    /// The device's owner may write the region.
    Write = 0b10,
    /// The region is restored on a first-level watchdog recovery.
    RecoveryLevel1 = 0b100,
    /// The region is restored on a second-level watchdog recovery.
    RecoveryLevel2 = 0b1000,
    /// The region is restored on a third-level watchdog recovery.
    RecoveryLevel3 = 0b10000,
    /// A write to the region triggers recovery.
    RouteOnWrite = 0b100000,
}

impl Protection {
    /// Returns the recovery bit for watchdog recovery `level`, which is one
    /// of 1, 2, or 3.
    pub fn recovery_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::RecoveryLevel1),
            2 => Some(Self::RecoveryLevel2),
            3 => Some(Self::RecoveryLevel3),
            _ => None,
        }
    }
}

/// Digests a SPI region definition may carry.
#[bitflags]
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RegionHash {
    /// A SHA-256 digest follows the fixed fields.
    Sha256 = 0b1,
    /// A SHA-384 digest follows the fixed fields (and the SHA-256 one, if
    /// present).
    Sha384 = 0b10,
}

/// A span of flash and its runtime access policy.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SpiRegion {
    /// The access policy.
    pub protection: BitFlags<Protection>,
    /// Which digests are present.
    pub hashes: BitFlags<RegionHash>,
    /// The span of flash, `[start, end)`.
    pub region: Region,
    /// The SHA-256 digest, if `hashes` contains it.
    pub sha256: [u8; 32],
    /// The SHA-384 digest, if `hashes` contains it.
    pub sha384: [u8; 48],
}

impl SpiRegion {
    /// Returns whether this region is read-only: its contents are fixed by
    /// the manifest.
    pub fn is_static(&self) -> bool {
        self.protection.contains(Protection::Read)
            && !self.protection.contains(Protection::Write)
    }

    /// Returns whether this region is read-write, such as a log or
    /// variable store.
    pub fn is_dynamic(&self) -> bool {
        self.protection
            .contains(Protection::Read | Protection::Write)
    }

    /// Returns the digest to check this region's contents against, if any.
    ///
    /// SHA-256 is preferred when both are present.
    pub fn expected_hash(&self) -> Option<(hash::Algo, &[u8])> {
        if self.hashes.contains(RegionHash::Sha256) {
            Some((hash::Algo::Sha256, &self.sha256[..]))
        } else if self.hashes.contains(RegionHash::Sha384) {
            Some((hash::Algo::Sha384, &self.sha384[..]))
        } else {
            None
        }
    }

    /// Returns the encoded length of this definition.
    pub fn encoded_len(&self) -> u32 {
        let mut len = SPI_REGION_MIN_LEN;
        if self.hashes.contains(RegionHash::Sha256) {
            len += 32;
        }
        if self.hashes.contains(RegionHash::Sha384) {
            len += 48;
        }
        len
    }
}

/// An SMBus command filtering rule.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SmbusRule {
    /// The one-based relay id.
    pub bus_id: u8,
    /// The one-based rule id on that relay.
    pub rule_id: u8,
    /// The 8-bit address of the target device.
    pub device_addr: u8,
    /// A bitmap of the allowed command codes.
    pub whitelist: [u8; 32],
}

/// The location of a signed FVM.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct FvmAddr {
    /// The FV type the FVM must describe.
    pub fv_type: u16,
    /// The flash address of the signed FVM, as laid out on active flash.
    pub fvm_addr: u32,
}

impl FvmAddr {
    /// Returns where this FVM sits in a capsule whose signed PFM is at
    /// `signed_pfm`, given the provisioned `active` PFM address.
    ///
    /// A capsule lays out the PFM and its FVMs at the same relative offsets
    /// they have on active flash.
    pub fn in_capsule(&self, signed_pfm: u32, active: u32) -> Option<u32> {
        signed_pfm.checked_add(self.fvm_addr.checked_sub(active)?)
    }
}

/// A parsed manifest definition.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Definition {
    /// See [`SpiRegion`].
    SpiRegion(SpiRegion),
    /// See [`SmbusRule`].
    SmbusRule(SmbusRule),
    /// See [`FvmAddr`].
    FvmAddr(FvmAddr),
    /// A capability definition, which is skipped.
    Capability,
}

impl Definition {
    /// Returns this definition's type.
    pub fn def_type(&self) -> DefType {
        match self {
            Self::SpiRegion(_) => DefType::SpiRegion,
            Self::SmbusRule(_) => DefType::SmbusRule,
            Self::FvmAddr(_) => DefType::FvmAddr,
            Self::Capability => DefType::Capability,
        }
    }
}

/// A cursor over the definitions in a manifest body.
pub struct Definitions<'f, F: ?Sized> {
    io: FlashIo<'f, F>,
    done: bool,
}

impl<'f, F: Flash + ?Sized> Definitions<'f, F> {
    /// Creates a new cursor over `body`.
    pub fn new(flash: &'f F, body: Region) -> Self {
        Self {
            io: FlashIo::new(flash, body),
            done: false,
        }
    }

    /// Returns the flash address of the next definition.
    pub fn position(&self) -> u32 {
        self.io.position()
    }

    /// Returns the part of the body not yet read.
    ///
    /// Walks that must write to flash between definitions can drop the
    /// cursor and resume with a new one over this region. Once the walk has
    /// stopped at an unknown type, this is empty.
    pub fn remaining(&self) -> Region {
        if self.done {
            return Region::new(self.io.position(), 0);
        }
        Region::new(self.io.position(), self.io.remaining_data() as u32)
    }

    /// Reads the next definition.
    ///
    /// Returns `None` at the end of the body, and at the first unknown type
    /// byte; after that, every call returns `None`. A definition that does
    /// not fit in what remains of the body is an [`Error::Overrun`].
    pub fn read_next(&mut self) -> Result<Option<Definition>, Error> {
        if self.done || self.io.remaining_data() == 0 {
            return Ok(None);
        }

        let def_type = match DefType::from_wire_value(self.io.read_le()?) {
            Some(ty) => ty,
            None => {
                trace!("unknown definition at {:#x}", self.io.position() - 1);
                self.done = true;
                return Ok(None);
            }
        };

        let def = match def_type {
            DefType::SpiRegion => {
                let protection = self.io.read_le::<u8>()?;
                let hashes = self.io.read_le::<u16>()?;
                self.io.skip(4)?;
                let start = self.io.read_le::<u32>()?;
                let end = self.io.read_le::<u32>()?;

                let mut def = SpiRegion {
                    protection: BitFlags::from_bits_truncate(protection),
                    hashes: BitFlags::from_bits_truncate(hashes),
                    region: match Region::from_bounds(start, end) {
                        Some(r) => r,
                        None => return fail!(Error::BadRule),
                    },
                    sha256: [0; 32],
                    sha384: [0; 48],
                };
                if def.hashes.contains(RegionHash::Sha256) {
                    self.io.read_bytes(&mut def.sha256)?;
                }
                if def.hashes.contains(RegionHash::Sha384) {
                    self.io.read_bytes(&mut def.sha384)?;
                }
                Definition::SpiRegion(def)
            }
            DefType::SmbusRule => {
                self.io.skip(4)?;
                let mut def = SmbusRule {
                    bus_id: self.io.read_le()?,
                    rule_id: self.io.read_le()?,
                    device_addr: self.io.read_le()?,
                    whitelist: [0; 32],
                };
                self.io.read_bytes(&mut def.whitelist)?;
                Definition::SmbusRule(def)
            }
            DefType::FvmAddr => {
                let fv_type = self.io.read_le::<u16>()?;
                self.io.skip(5)?;
                let fvm_addr = self.io.read_le::<u32>()?;
                Definition::FvmAddr(FvmAddr { fv_type, fvm_addr })
            }
            DefType::Capability => {
                self.io.skip(CAPABILITY_LEN - 1)?;
                Definition::Capability
            }
        };
        Ok(Some(def))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::flash::Ram;
    use pretty_assertions::assert_eq;

    #[rustfmt::skip]
    const BODY: &[u8] = &[
        // SPI region: static, with a SHA-256 digest.
        0x01, 0b0000_0101, 0x01, 0x00,
        0x00, 0x00, 0x00, 0x00,
        0x00, 0x10, 0x00, 0x00,
        0x00, 0x30, 0x00, 0x00,
        0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
        0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
        0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,
        0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa,

        // FVM address.
        0x03, 0x02, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x04, 0x00,

        // Capability.
        0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,

        // SMBus rule.
        0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0xb0,
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80,

        // Padding.
        0xff, 0xff, 0xff, 0xff,
    ];

    #[test]
    fn parse_body() {
        let ram = Ram(BODY);
        let mut defs = Definitions::new(&ram, Region::new(0, BODY.len() as u32));

        let region = match defs.read_next().unwrap() {
            Some(Definition::SpiRegion(r)) => r,
            d => panic!("unexpected definition: {:?}", d),
        };
        assert!(region.is_static());
        assert!(!region.is_dynamic());
        assert!(region.protection.contains(Protection::RecoveryLevel1));
        assert_eq!(region.region, Region::new(0x1000, 0x2000));
        assert_eq!(region.encoded_len(), 48);
        assert_eq!(
            region.expected_hash(),
            Some((hash::Algo::Sha256, &[0xaa; 32][..]))
        );

        assert_eq!(defs.position(), 48);
        assert_eq!(
            defs.read_next().unwrap(),
            Some(Definition::FvmAddr(FvmAddr {
                fv_type: 2,
                fvm_addr: 0x40000,
            }))
        );
        assert_eq!(defs.read_next().unwrap(), Some(Definition::Capability));

        let mut whitelist = [0; 32];
        whitelist[0] = 0x01;
        whitelist[31] = 0x80;
        assert_eq!(
            defs.read_next().unwrap(),
            Some(Definition::SmbusRule(SmbusRule {
                bus_id: 1,
                rule_id: 2,
                device_addr: 0xb0,
                whitelist,
            }))
        );

        assert_eq!(defs.read_next().unwrap(), None);
        assert_eq!(defs.read_next().unwrap(), None);
    }

    #[test]
    fn truncated_definition() {
        let ram = Ram(BODY);
        let mut defs = Definitions::new(&ram, Region::new(0, 40));
        let err = defs.read_next().unwrap_err();
        assert_eq!(err.into_inner(), Error::Overrun);
    }

    #[test]
    fn inverted_region() {
        let mut body = BODY[..16].to_vec();
        body[1] = 0b11;
        body[2] = 0;
        body[10] = 0x40;
        let ram = Ram(&body);
        let mut defs = Definitions::new(&ram, Region::new(0, 16));
        let err = defs.read_next().unwrap_err();
        assert_eq!(err.into_inner(), Error::BadRule);
    }

    #[test]
    fn fvm_in_capsule() {
        let fvm = FvmAddr {
            fv_type: 1,
            fvm_addr: 0x3_0000,
        };
        assert_eq!(fvm.in_capsule(0x8_0400, 0x1_0000), Some(0xa_0400));
        assert_eq!(fvm.in_capsule(0x8_0400, 0x4_0000), None);
    }
}
