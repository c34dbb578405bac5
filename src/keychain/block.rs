// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fixed layouts of the 1 KiB signature that precedes every signed payload.
//!
//! These types are read straight out of flash with
//! [`FlashExt::read_object()`](crate::hardware::flash::FlashExt), so every
//! field is a `u32` (or an array of them) stored little-endian. Key and
//! signature fields are kept as raw bytes; see [`Scalar`].

use static_assertions::assert_eq_size;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::crypto::ecdsa::Curve;

/// The length of Block0.
pub const BLOCK0_LEN: u32 = 128;

/// The length of Block1.
pub const BLOCK1_LEN: u32 = 896;

/// The length of the whole signature; protected content starts this far past
/// the start of a signed payload.
pub const SIGNATURE_LEN: u32 = BLOCK0_LEN + BLOCK1_LEN;

/// Offset of the root entry within Block1.
pub const ROOT_ENTRY_OFFSET: u32 = 16;

/// Offset of the CSK entry within Block1.
pub const CSK_ENTRY_OFFSET: u32 = 148;

/// Offset of the Block0 entry within Block1 in a three-entry chain.
///
/// In a key cancellation certificate, the Block0 entry takes the CSK entry's
/// place at [`CSK_ENTRY_OFFSET`].
pub const B0_ENTRY_OFFSET: u32 = 380;

wire_enum! {
    /// Magic numbers tagging each part of a signature.
    pub enum Magic: u32 {
        /// Block0.
        Block0 = 0xB6EAFD19,
        /// The Block1 header.
        Block1 = 0xF27F28D7,
        /// The root entry.
        RootEntry = 0xA757A046,
        /// The CSK entry.
        CskEntry = 0x14711C2F,
        /// The Block0 entry.
        Block0Entry = 0x15364367,
    }
}

wire_enum! {
    /// Identifies the curve of a public key entry.
    pub enum CurveMagic: u32 {
        /// secp256r1.
        P256 = 0xC7B88C74,
        /// secp384r1.
        P384 = 0x08F07B47,
    }
}

wire_enum! {
    /// Identifies the curve (and digest) of a signature entry.
    pub enum SigMagic: u32 {
        /// ECDSA over secp256r1 with SHA-256.
        P256 = 0xDE64437D,
        /// ECDSA over secp384r1 with SHA-384.
        P384 = 0xEA2A50E9,
    }
}

impl CurveMagic {
    /// Returns the curve this magic names.
    pub fn curve(self) -> Curve {
        match self {
            Self::P256 => Curve::P256,
            Self::P384 => Curve::P384,
        }
    }
}

impl SigMagic {
    /// Returns the curve this magic names.
    pub fn curve(self) -> Curve {
        match self {
            Self::P256 => Curve::P256,
            Self::P384 => Curve::P384,
        }
    }

    /// Returns the signature magic for `curve`.
    pub fn for_curve(curve: Curve) -> Self {
        match curve {
            Curve::P256 => Self::P256,
            Curve::P384 => Self::P384,
        }
    }
}

impl From<Curve> for CurveMagic {
    fn from(curve: Curve) -> Self {
        match curve {
            Curve::P256 => Self::P256,
            Curve::P384 => Self::P384,
        }
    }
}

/// A 48-byte coordinate or scalar, stored least-significant byte first.
///
/// P-256 values use the first 32 bytes; the rest is padding.
pub type Scalar = [u32; 12];

/// Reverses the first `curve.scalar_bytes()` bytes of `le` into big-endian.
///
/// Only the first `curve.scalar_bytes()` bytes of the result are meaningful.
pub fn scalar_to_be(le: &Scalar, curve: Curve) -> [u8; 48] {
    let n = curve.scalar_bytes();
    let mut be = [0; 48];
    for (dst, src) in be[..n].iter_mut().zip(le.as_bytes()[..n].iter().rev()) {
        *dst = *src;
    }
    be
}

/// Stores big-endian `be` as a least-significant-byte-first [`Scalar`].
pub fn scalar_from_be(be: &[u8]) -> Scalar {
    let mut le = Scalar::default();
    for (dst, src) in le.as_bytes_mut().iter_mut().zip(be.iter().rev()) {
        *dst = *src;
    }
    le
}

/// Block0: describes and hashes the protected content.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Block0 {
    /// [`Magic::Block0`].
    pub magic: u32,
    /// The length of the protected content.
    pub pc_length: u32,
    /// The content type, plus the flags in [`PcFlag`](super::PcFlag).
    pub pc_type: u32,
    /// Reserved; must be zero.
    pub reserved: u32,
    /// SHA-256 of the protected content, for P-256 signatures.
    pub hash256: [u32; 8],
    /// SHA-384 of the protected content, for P-384 signatures.
    pub hash384: [u32; 12],
    /// Reserved; must be zero.
    pub reserved2: [u32; 8],
}
assert_eq_size!(Block0, [u8; BLOCK0_LEN as usize]);

/// The header of Block1.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Block1Header {
    /// [`Magic::Block1`].
    pub magic: u32,
    /// Reserved; must be zero.
    pub reserved: [u32; 3],
}
assert_eq_size!(Block1Header, [u8; ROOT_ENTRY_OFFSET as usize]);

/// A public key and its policy; the body of both the root and CSK entries.
///
/// For a CSK, these 128 bytes are exactly what the root key signs.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct KeyBody {
    /// A [`CurveMagic`].
    pub curve_magic: u32,
    /// A [`Permission`](super::Permission) mask.
    pub permissions: u32,
    /// The key's cancellation id.
    pub key_id: u32,
    /// The affine X coordinate.
    pub x: Scalar,
    /// The affine Y coordinate.
    pub y: Scalar,
    /// Reserved; must be zero.
    pub reserved: [u32; 5],
}
assert_eq_size!(KeyBody, [u8; 128]);

/// The root entry.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct RootEntry {
    /// [`Magic::RootEntry`].
    pub magic: u32,
    /// The root key.
    pub key: KeyBody,
}
assert_eq_size!(
    RootEntry,
    [u8; (CSK_ENTRY_OFFSET - ROOT_ENTRY_OFFSET) as usize]
);

/// A signature, tagged with its curve.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct SigBody {
    /// A [`SigMagic`].
    pub sig_magic: u32,
    /// The `r` scalar.
    pub r: Scalar,
    /// The `s` scalar.
    pub s: Scalar,
}
assert_eq_size!(SigBody, [u8; 100]);

/// The CSK entry: a code signing key, signed by the root key.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct CskEntry {
    /// [`Magic::CskEntry`].
    pub magic: u32,
    /// The signed key.
    pub key: KeyBody,
    /// The root key's signature over `key`.
    pub sig: SigBody,
}
assert_eq_size!(
    CskEntry,
    [u8; (B0_ENTRY_OFFSET - CSK_ENTRY_OFFSET) as usize]
);

/// The Block0 entry: a signature over all of Block0.
#[derive(Copy, Clone, Debug, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct Block0Entry {
    /// [`Magic::Block0Entry`].
    pub magic: u32,
    /// The signature.
    pub sig: SigBody,
}
assert_eq_size!(Block0Entry, [u8; 104]);

/// The protected content of a key cancellation certificate.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct CancellationCert {
    /// The CSK id to cancel.
    pub csk_id: u32,
    /// Reserved; must be zero.
    pub reserved: [u32; 31],
}
assert_eq_size!(CancellationCert, [u8; 128]);
