// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! ECDSA over the two NIST prime curves `pfr` accepts.
//!
//! All key coordinates and signature scalars passed through these traits
//! are big-endian and exactly [`Curve::scalar_bytes()`] long. Flash stores
//! them least-significant byte first; converting is the caller's job.

use crate::crypto::hash;

#[cfg(feature = "arbitrary-derive")]
use libfuzzer_sys::arbitrary::{self, Arbitrary};

/// An elliptic curve, which also fixes the digest used with it.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "arbitrary-derive", derive(Arbitrary))]
pub enum Curve {
    /// secp256r1, with SHA-256.
    P256,
    /// secp384r1, with SHA-384.
    P384,
}

impl Curve {
    /// The number of bytes in a coordinate or scalar on this curve.
    #[inline]
    pub const fn scalar_bytes(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
        }
    }

    /// The digest signatures over this curve are computed with.
    #[inline]
    pub const fn hash_algo(self) -> hash::Algo {
        match self {
            Self::P256 => hash::Algo::Sha256,
            Self::P384 => hash::Algo::Sha384,
        }
    }
}

/// An ECDSA public key, as big-endian affine coordinates.
#[derive(Copy, Clone, Debug)]
pub struct PublicKey<'a> {
    /// The curve this key lies on.
    pub curve: Curve,
    /// The X coordinate.
    pub x: &'a [u8],
    /// The Y coordinate.
    pub y: &'a [u8],
}

/// An ECDSA signature, as big-endian scalars.
#[derive(Copy, Clone, Debug)]
pub struct Signature<'a> {
    /// The `r` scalar.
    pub r: &'a [u8],
    /// The `s` scalar.
    pub s: &'a [u8],
}

/// An error returned by an ECDSA operation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Indicates that a key or signature had the wrong shape for its curve,
    /// or that a public key was not a valid curve point.
    BadKey,

    /// Indicates that a signature did not verify.
    BadSignature,

    /// Indicates an unspecified, internal error.
    Unspecified,
}

/// A signature-verification engine.
///
/// Unlike a signer, a verifier is not bound to a key: every call names the
/// key to verify against, since a single chain check uses two of them.
pub trait Verify {
    /// Verifies that `signature` is a signature over `message` by `key`,
    /// using the digest [`Curve::hash_algo()`] of `key`'s curve.
    ///
    /// Returns `Ok(())` only if the signature is valid.
    fn verify(
        &mut self,
        key: PublicKey,
        message: &[u8],
        signature: Signature,
    ) -> Result<(), Error>;
}
impl dyn Verify {} // Ensure object-safe.

/// A signing engine, already primed with a keypair.
///
/// There is no way to extract the private key back out of a `Sign` value.
/// This trait exists for host tooling that produces signed payloads.
pub trait Sign {
    /// Returns the curve of this signer's keypair.
    fn curve(&self) -> Curve;

    /// Writes the big-endian public key coordinates into `x` and `y`.
    fn public_key(&self, x: &mut [u8], y: &mut [u8]) -> Result<(), Error>;

    /// Signs `message`, writing the big-endian scalars into `r` and `s`.
    fn sign(
        &mut self,
        message: &[u8],
        r: &mut [u8],
        s: &mut [u8],
    ) -> Result<(), Error>;
}
impl dyn Sign {} // Ensure object-safe.
