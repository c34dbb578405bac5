// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Manifest builders, for host tooling and tests.
//!
//! The output of these builders is protected content; sign it with
//! [`keychain::owned::Signer`](crate::keychain::owned::Signer) to produce
//! something [`Validator`](super::Validator) will accept.

use enumflags2::BitFlags;
use zerocopy::AsBytes as _;

use crate::hardware::flash::Region;
use crate::manifest::def::FvmAddr;
use crate::manifest::def::Protection;
use crate::manifest::def::RegionHash;
use crate::manifest::def::SmbusRule;
use crate::manifest::def::SpiRegion;
use crate::manifest::def::CAPABILITY_LEN;
use crate::manifest::Definition;
use crate::manifest::FvmHeader;
use crate::manifest::Header;
use crate::manifest::Tag;
use crate::manifest::HEADER_LEN;
use crate::wire::WireEnum as _;

/// An owned platform firmware manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pfm {
    /// The security version number.
    pub svn: u8,
    /// The best-known-configuration version.
    pub bkc: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
    /// The body.
    pub definitions: Vec<Definition>,
}

impl Pfm {
    /// Encodes this manifest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = encode_body(&self.definitions);
        let header = Header {
            tag: Tag::Pfm.to_wire_value(),
            svn: self.svn,
            bkc_version: self.bkc,
            major: self.major,
            minor: self.minor,
            length: HEADER_LEN + body.len() as u32,
            ..Default::default()
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An owned firmware volume manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fvm {
    /// The security version number.
    pub svn: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
    /// The FV type.
    pub fv_type: u16,
    /// The body; only SPI regions and capabilities are meaningful here.
    pub definitions: Vec<Definition>,
}

impl Fvm {
    /// Encodes this manifest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = encode_body(&self.definitions);
        let header = FvmHeader {
            tag: Tag::Fvm.to_wire_value(),
            svn: self.svn,
            major: self.major,
            minor: self.minor,
            fv_type: self.fv_type,
            length: HEADER_LEN + body.len() as u32,
            ..Default::default()
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    }
}

/// An owned attestation manifest.
///
/// The body is opaque to this crate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Afm {
    /// The security version number.
    pub svn: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
    /// The raw body.
    pub body: Vec<u8>,
}

impl Afm {
    /// Encodes this manifest.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = Header {
            tag: Tag::Afm.to_wire_value(),
            svn: self.svn,
            major: self.major,
            minor: self.minor,
            length: HEADER_LEN + self.body.len() as u32,
            ..Default::default()
        };
        let mut out = header.as_bytes().to_vec();
        out.extend_from_slice(&self.body);
        out
    }
}

impl SpiRegion {
    /// Creates a region definition with no digests.
    pub fn new(protection: BitFlags<Protection>, region: Region) -> Self {
        Self {
            protection,
            hashes: BitFlags::empty(),
            region,
            sha256: [0; 32],
            sha384: [0; 48],
        }
    }

    /// Attaches a SHA-256 digest of the region's contents.
    pub fn with_sha256(mut self, digest: [u8; 32]) -> Self {
        self.hashes |= RegionHash::Sha256;
        self.sha256 = digest;
        self
    }

    /// Attaches a SHA-384 digest of the region's contents.
    pub fn with_sha384(mut self, digest: [u8; 48]) -> Self {
        self.hashes |= RegionHash::Sha384;
        self.sha384 = digest;
        self
    }
}

/// Encodes a single definition.
pub fn encode_definition(def: &Definition, out: &mut Vec<u8>) {
    out.push(def.def_type().to_wire_value());
    match def {
        Definition::SpiRegion(r) => {
            out.push(r.protection.bits());
            out.extend_from_slice(&r.hashes.bits().to_le_bytes());
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&r.region.ptr.address.to_le_bytes());
            let end = r.region.ptr.address.wrapping_add(r.region.len);
            out.extend_from_slice(&end.to_le_bytes());
            if r.hashes.contains(RegionHash::Sha256) {
                out.extend_from_slice(&r.sha256);
            }
            if r.hashes.contains(RegionHash::Sha384) {
                out.extend_from_slice(&r.sha384);
            }
        }
        Definition::SmbusRule(SmbusRule {
            bus_id,
            rule_id,
            device_addr,
            whitelist,
        }) => {
            out.extend_from_slice(&[0; 4]);
            out.extend_from_slice(&[*bus_id, *rule_id, *device_addr]);
            out.extend_from_slice(whitelist);
        }
        Definition::FvmAddr(FvmAddr { fv_type, fvm_addr }) => {
            out.extend_from_slice(&fv_type.to_le_bytes());
            out.extend_from_slice(&[0; 5]);
            out.extend_from_slice(&fvm_addr.to_le_bytes());
        }
        Definition::Capability => {
            out.resize(out.len() + CAPABILITY_LEN as usize - 1, 0);
        }
    }
}

fn encode_body(defs: &[Definition]) -> Vec<u8> {
    let mut out = Vec::new();
    for def in defs {
        encode_definition(def, &mut out);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::flash::Ram;
    use crate::manifest::def;
    use crate::manifest::Definitions;
    use pretty_assertions::assert_eq;

    #[test]
    fn definitions_reparse() {
        let defs = vec![
            Definition::SpiRegion(
                SpiRegion::new(
                    Protection::Read | Protection::RecoveryLevel2,
                    Region::new(0x2000, 0x1000),
                )
                .with_sha384([7; 48]),
            ),
            Definition::Capability,
            Definition::SmbusRule(SmbusRule {
                bus_id: 3,
                rule_id: 16,
                device_addr: 0x90,
                whitelist: [0x55; 32],
            }),
            Definition::FvmAddr(FvmAddr {
                fv_type: 9,
                fvm_addr: 0x12_3000,
            }),
        ];
        let body = encode_body(&defs);
        assert_eq!(
            body.len() as u32,
            16 + 48 + CAPABILITY_LEN + def::SMBUS_RULE_LEN + def::FVM_ADDR_LEN
        );

        let ram = Ram(&body);
        let mut cursor = Definitions::new(&ram, Region::new(0, body.len() as u32));
        let mut parsed = Vec::new();
        while let Some(def) = cursor.read_next().unwrap() {
            parsed.push(def);
        }
        assert_eq!(parsed, defs);
    }

    #[test]
    fn afm_header() {
        let afm = Afm {
            svn: 2,
            body: vec![0xee; 64],
            ..Default::default()
        };
        let bytes = afm.to_bytes();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[..4], &[0x1d, 0xce, 0x83, 0x88]);
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[28..32], &[96, 0, 0, 0]);
    }
}
