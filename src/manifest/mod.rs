// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Platform firmware manifests.
//!
//! A platform firmware manifest (PFM) is the protected content of a signed
//! payload (see [`keychain`](crate::keychain)); it describes which regions of
//! a flash device hold firmware, how each region may be accessed at runtime,
//! and which SMBus commands the device's owner may issue.
//!
//! # Wire Format
//!
//! Every manifest starts with a 32-byte header, expressed here as a
//! pseudo-Rust struct. Integers are little-endian, and `_` indicates
//! reserved fields.
//! ```ignore
//! struct Manifest {
//!     tag: u32, // See `Tag`.
//!     svn: u8,
//!     bkc_version: u8,
//!     major: u8,
//!     minor: u8,
//!     _: u32,
//!     oem: [u8; 16],
//!     length: u32, // Header included.
//!
//!     body: [Definition],
//! }
//! ```
//!
//! A firmware volume manifest (FVM) uses the same header shape, except that
//! the `_` words carry an FV type; see [`FvmHeader`].
//!
//! The body is a sequence of variable-length [`def::Definition`]s, each
//! starting with a one-byte type. Walking stops at the end of the body, or
//! at the first byte that is not a known definition type; the latter is how
//! padding after the last definition is skipped.
//!
//! [`Validator`] walks the body of an authenticated PFM and applies its
//! policy to the bus [`Filter`](crate::hardware::Filter)s. With the `std`
//! feature, [`owned`] can build manifests, for tooling and tests.

use static_assertions::assert_eq_size;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::hash;
use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::Region;
use crate::io;
use crate::keychain;
use crate::keychain::block::SIGNATURE_LEN;
use crate::wire::WireEnum as _;
use crate::Result;

pub mod def;
pub use def::Definition;
pub use def::Definitions;

mod validate;
pub use validate::Validator;

#[cfg(feature = "std")]
pub mod owned;

/// The length of a manifest header.
pub const HEADER_LEN: u32 = 32;

/// The largest FV type an FVM may describe.
pub const MAX_FVM_TYPE: u16 = 9;

/// Errors returned by manifest parsing and validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that a manifest header had the wrong tag.
    BadTag,

    /// Indicates that a length field, or a definition, ran past the end of
    /// its container.
    Overrun,

    /// Indicates that a static region did not match its hash.
    BadHash,

    /// Indicates that an FVM address was not 4 KiB aligned.
    BadAlignment,

    /// Indicates that an FVM's type did not match its address definition,
    /// or was out of range.
    BadFvType,

    /// Indicates a malformed SPI region or SMBus rule.
    BadRule,

    /// Indicates that an FVM failed authentication.
    Unauthenticated(keychain::Error),

    /// Indicates that a flash operation failed.
    Flash,

    /// Indicates an I/O error while walking a body.
    Io(io::Error),

    /// Indicates that the hash engine failed.
    Hash,
}

impl From<keychain::Error> for Error {
    fn from(e: keychain::Error) -> Self {
        match e {
            keychain::Error::Flash => Self::Flash,
            keychain::Error::Hash => Self::Hash,
            e => Self::Unauthenticated(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e {
            io::Error::BufferExhausted => Self::Overrun,
            e => Self::Io(e),
        }
    }
}

impl From<flash::Error> for Error {
    fn from(_: flash::Error) -> Self {
        Self::Flash
    }
}

impl From<hash::Error> for Error {
    fn from(_: hash::Error) -> Self {
        Self::Hash
    }
}

debug_from!(Error => keychain::Error, io::Error);
debug_from!(@plain Error => flash::Error, hash::Error);

wire_enum! {
    /// The tag that opens a manifest header.
    pub enum Tag: u32 {
        /// A platform firmware manifest.
        Pfm = 0x02B3CE1D,
        /// A firmware volume manifest.
        Fvm = 0xA8E7C2D4,
        /// An attestation manifest.
        Afm = 0x8883CE1D,
    }
}

/// The header of a PFM or AFM.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Header {
    /// A [`Tag`].
    pub tag: u32,
    /// The security version number.
    pub svn: u8,
    /// The best-known-configuration version.
    pub bkc_version: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
    /// Reserved.
    pub reserved: u32,
    /// Opaque OEM data.
    pub oem: [u8; 16],
    /// The length of the manifest, header included.
    pub length: u32,
}
assert_eq_size!(Header, [u8; HEADER_LEN as usize]);

/// The header of an FVM.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct FvmHeader {
    /// [`Tag::Fvm`].
    pub tag: u32,
    /// The security version number.
    pub svn: u8,
    /// Reserved.
    pub reserved: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
    /// Reserved.
    pub reserved2: u16,
    /// The firmware volume type this manifest describes.
    pub fv_type: u16,
    /// Opaque OEM data.
    pub oem: [u8; 16],
    /// The length of the manifest, header included.
    pub length: u32,
}
assert_eq_size!(FvmHeader, [u8; HEADER_LEN as usize]);

/// Version information from a manifest header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct ManifestInfo {
    /// The security version number.
    pub svn: u8,
    /// The best-known-configuration version.
    pub bkc: u8,
    /// The major revision.
    pub major: u8,
    /// The minor revision.
    pub minor: u8,
}

impl From<&Header> for ManifestInfo {
    fn from(h: &Header) -> Self {
        Self {
            svn: h.svn,
            bkc: h.bkc_version,
            major: h.major,
            minor: h.minor,
        }
    }
}

/// Returns the body of a manifest whose header starts at `manifest`, given
/// the `length` field of that header.
///
/// `limit` is the protected-content length of the signed payload holding
/// the manifest; the manifest may not claim more than that.
fn body(manifest: u32, length: u32, limit: u32) -> Result<Region, Error> {
    check!(length >= HEADER_LEN && length <= limit, Error::Overrun);
    let start = match manifest.checked_add(HEADER_LEN) {
        Some(start) => start,
        None => return fail!(Error::Overrun),
    };
    let region = Region::new(start, length - HEADER_LEN);
    check!(region.end().is_some(), Error::Overrun);
    Ok(region)
}

/// Returns the address and length of the protected content of the signed
/// payload at `addr`.
fn content<F: Flash + ?Sized>(flash: &F, addr: u32) -> Result<(u32, u32), Error> {
    let limit = keychain::signed_payload_size(flash, addr)? - SIGNATURE_LEN;
    match addr.checked_add(SIGNATURE_LEN) {
        Some(manifest) => Ok((manifest, limit)),
        None => fail!(Error::Overrun),
    }
}

/// Reads the header of the manifest held by the signed payload at `addr`,
/// requiring it to carry `tag`.
///
/// Returns the header and the manifest's body. This does not authenticate
/// the payload; callers should do that first.
pub fn read_header<F: Flash + ?Sized>(
    flash: &F,
    addr: u32,
    tag: Tag,
) -> Result<(Header, Region), Error> {
    let (manifest, limit) = content(flash, addr)?;
    let header = flash.read_object::<Header>(Ptr::new(manifest))?;
    check!(
        Tag::from_wire_value(header.tag) == Some(tag),
        Error::BadTag
    );
    let body = body(manifest, header.length, limit)?;
    Ok((header, body))
}

/// Reads the header of the FVM held by the signed payload at `addr`.
///
/// Returns the header and the FVM's body. This does not authenticate the
/// payload, nor check the FV type.
pub fn read_fvm_header<F: Flash + ?Sized>(
    flash: &F,
    addr: u32,
) -> Result<(FvmHeader, Region), Error> {
    let (manifest, limit) = content(flash, addr)?;
    let header = flash.read_object::<FvmHeader>(Ptr::new(manifest))?;
    check!(
        Tag::from_wire_value(header.tag) == Some(Tag::Fvm),
        Error::BadTag
    );
    let body = body(manifest, header.length, limit)?;
    Ok((header, body))
}

/// Reads the version information of the PFM in the signed payload at
/// `pfm_addr`.
pub fn read_manifest_info<F: Flash + ?Sized>(
    flash: &F,
    pfm_addr: u32,
) -> Result<ManifestInfo, Error> {
    let (header, _) = read_header(flash, pfm_addr, Tag::Pfm)?;
    Ok(ManifestInfo::from(&header))
}

/// Visits every definition in `body`, in order.
///
/// The walk ends at the end of the body, or at the first unknown
/// definition type. FVM address definitions are visited, not followed.
pub fn for_each_definition<F, V>(
    flash: &F,
    body: Region,
    mut visit: V,
) -> Result<(), Error>
where
    F: Flash + ?Sized,
    V: FnMut(Definition) -> Result<(), Error>,
{
    let mut defs = Definitions::new(flash, body);
    while let Some(def) = defs.read_next()? {
        visit(def)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::flash::Ram;
    use crate::manifest::owned;
    use pretty_assertions::assert_eq;

    /// Wraps `manifest` in a fake, unsigned payload: just enough of Block0
    /// for the length to be read.
    fn fake_signed(manifest: &[u8]) -> Vec<u8> {
        let mut buf = vec![0; SIGNATURE_LEN as usize];
        buf[4..8].copy_from_slice(&(manifest.len() as u32).to_le_bytes());
        buf.extend_from_slice(manifest);
        buf
    }

    #[test]
    fn header_info() {
        let pfm = owned::Pfm {
            svn: 3,
            bkc: 1,
            major: 2,
            minor: 9,
            definitions: vec![],
        };
        let signed = fake_signed(&pfm.to_bytes());
        assert_eq!(
            read_manifest_info(&Ram(&signed), 0).unwrap(),
            ManifestInfo {
                svn: 3,
                bkc: 1,
                major: 2,
                minor: 9
            }
        );

        let (header, body) = read_header(&Ram(&signed), 0, Tag::Pfm).unwrap();
        assert_eq!(header.length, HEADER_LEN);
        assert_eq!(body, Region::new(SIGNATURE_LEN + HEADER_LEN, 0));

        let err = read_header(&Ram(&signed), 0, Tag::Afm).unwrap_err();
        assert_eq!(err.into_inner(), Error::BadTag);
    }

    #[test]
    fn length_overrun() {
        let pfm = owned::Pfm::default();
        let mut bytes = pfm.to_bytes();
        // Claim one byte more than the payload holds.
        let len = bytes.len() as u32 + 1;
        bytes[28..32].copy_from_slice(&len.to_le_bytes());
        let signed = fake_signed(&bytes);
        let err = read_manifest_info(&Ram(&signed), 0).unwrap_err();
        assert_eq!(err.into_inner(), Error::Overrun);

        bytes[28..32].copy_from_slice(&4u32.to_le_bytes());
        let signed = fake_signed(&bytes);
        let err = read_manifest_info(&Ram(&signed), 0).unwrap_err();
        assert_eq!(err.into_inner(), Error::Overrun);
    }

    #[test]
    fn fvm_header() {
        let fvm = owned::Fvm {
            svn: 1,
            major: 0,
            minor: 1,
            fv_type: 4,
            definitions: vec![],
        };
        let signed = fake_signed(&fvm.to_bytes());
        let (header, _) = read_fvm_header(&Ram(&signed), 0).unwrap();
        assert_eq!(header.fv_type, 4);
        assert_eq!(
            read_header(&Ram(&signed), 0, Tag::Pfm)
                .unwrap_err()
                .into_inner(),
            Error::BadTag
        );
    }

    #[test]
    fn error_conversion() {
        assert_eq!(Error::from(keychain::Error::Flash), Error::Flash);
        assert_eq!(
            Error::from(keychain::Error::BadSignature),
            Error::Unauthenticated(keychain::Error::BadSignature)
        );
        assert_eq!(Error::from(io::Error::BufferExhausted), Error::Overrun);
    }
}
