// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! SHA-2 digests over keys, payloads and firmware regions.
//!
//! Platforms supply an [`Engine`], typically a hardware accelerator. The
//! rest of the crate drives it through [`EngineExt`], which hands out a
//! [`Hasher`] per digest and collects the result into a [`Digest`] sized
//! for the algorithm in use.

#[cfg(feature = "arbitrary-derive")]
use libfuzzer_sys::arbitrary::{self, Arbitrary};

/// A digest algorithm, selected by the curve of the key that signs over it.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "arbitrary-derive", derive(Arbitrary))]
pub enum Algo {
    /// SHA-256, paired with P-256 keys.
    Sha256,
    /// SHA-384, paired with P-384 keys.
    Sha384,
}

impl Algo {
    /// Returns the digest length, in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

/// The length of a SHA-384 digest, the longest in use.
pub const MAX_DIGEST_BYTES: usize = Algo::Sha384.bytes();

/// A failure reported by an [`Engine`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// The output buffer does not match the digest length.
    WrongSize,

    /// Data or a finish request arrived with no digest in progress.
    Idle,

    /// The engine cannot compute this algorithm.
    Unsupported,

    /// The engine failed for some other reason.
    Unspecified,
}

/// A digest engine, holding the state of at most one digest at a time.
///
/// Only the `*_raw` calls are implemented by platforms; everything else in
/// the crate goes through [`EngineExt`].
pub trait Engine {
    /// Returns whether `algo` can be computed by this engine.
    fn supports(&mut self, algo: Algo) -> bool;

    /// Starts a fresh digest, dropping any digest in progress.
    fn start_raw(&mut self, algo: Algo) -> Result<(), Error>;

    /// Feeds `data` into the digest in progress.
    fn write_raw(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Writes out the digest in progress and ends it.
    fn finish_raw(&mut self, out: &mut [u8]) -> Result<(), Error>;
}
impl dyn Engine {} // Ensure object-safe.

/// Convenience entry points over an [`Engine`].
#[extend::ext(name = EngineExt)]
pub impl<E: Engine + ?Sized> E {
    /// Starts a digest with `algo`.
    #[inline]
    fn new_hash(&mut self, algo: Algo) -> Result<Hasher<&mut Self>, Error> {
        if !self.supports(algo) {
            return Err(Error::Unsupported);
        }
        self.start_raw(algo)?;
        Ok(Hasher { engine: self, algo })
    }

    /// Digests `buf` in one go, writing the result to `out`.
    ///
    /// `out` is usually a hash field of a structure being built, such as
    /// Block0's `hash256`.
    #[inline]
    fn contiguous_hash(
        &mut self,
        algo: Algo,
        buf: &[u8],
        out: &mut [u8],
    ) -> Result<(), Error> {
        let mut h = self.new_hash(algo)?;
        h.write(buf)?;
        h.finish(out)
    }

    /// Digests `buf` in one go.
    #[inline]
    fn digest(&mut self, algo: Algo, buf: &[u8]) -> Result<Digest, Error> {
        let mut h = self.new_hash(algo)?;
        h.write(buf)?;
        h.finish_digest()
    }
}

/// A digest in progress on some [`Engine`].
pub struct Hasher<E> {
    engine: E,
    algo: Algo,
}

impl<E: Engine + ?Sized> Hasher<&mut E> {
    /// Returns the algorithm being computed.
    pub fn algo(&self) -> Algo {
        self.algo
    }

    /// Feeds `data` into the digest.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.engine.write_raw(data)
    }

    /// Ends the digest, writing it to `out`, which must be exactly
    /// `algo().bytes()` long.
    pub fn finish(self, out: &mut [u8]) -> Result<(), Error> {
        if out.len() != self.algo.bytes() {
            return Err(Error::WrongSize);
        }
        self.engine.finish_raw(out)
    }

    /// Ends the digest, returning it by value.
    pub fn finish_digest(self) -> Result<Digest, Error> {
        let mut digest = Digest {
            algo: self.algo,
            bytes: [0; MAX_DIGEST_BYTES],
        };
        self.finish(&mut digest.bytes[..digest.algo.bytes()])?;
        Ok(digest)
    }
}

/// A finished digest of either length.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Digest {
    algo: Algo,
    bytes: [u8; MAX_DIGEST_BYTES],
}

impl Digest {
    /// Returns the algorithm that produced this digest.
    pub fn algo(&self) -> Algo {
        self.algo
    }

    /// Returns the digest bytes; 32 or 48 of them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.algo.bytes()]
    }

    /// Returns whether `expected` is exactly this digest.
    ///
    /// A SHA-256 digest never matches a 48-byte field, even if the field
    /// starts with it.
    pub fn matches(&self, expected: &[u8]) -> bool {
        self.as_bytes() == expected
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
