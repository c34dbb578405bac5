// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Signing of payloads, for host tooling.
//!
//! This is the inverse of [`Verifier`](super::Verifier): given a root key, a
//! CSK, and some content, it produces a signed payload that verifies against
//! a provisioning holding [`root_key_hash()`] of that root key.

use enumflags2::BitFlags;
use zerocopy::AsBytes as _;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::Curve;
use crate::crypto::hash;
use crate::crypto::hash::EngineExt as _;
use crate::keychain::block;
use crate::keychain::block::Block0;
use crate::keychain::block::Block0Entry;
use crate::keychain::block::Block1Header;
use crate::keychain::block::CancellationCert;
use crate::keychain::block::CskEntry;
use crate::keychain::block::CurveMagic;
use crate::keychain::block::KeyBody;
use crate::keychain::block::Magic;
use crate::keychain::block::RootEntry;
use crate::keychain::block::SigBody;
use crate::keychain::block::SigMagic;
use crate::keychain::Error;
use crate::keychain::PcFlag;
use crate::keychain::PcType;
use crate::keychain::Permission;
use crate::Result;
use crate::wire::WireEnum as _;

/// Computes the provisioned hash of `root`'s public key: the curve's digest
/// over the big-endian `X || Y`.
pub fn root_key_hash(
    root: &dyn ecdsa::Sign,
    hash: &mut dyn hash::Engine,
) -> Result<hash::Digest, Error> {
    let curve = root.curve();
    let n = curve.scalar_bytes();
    let mut xy = [0; 96];
    let (x, y) = xy[..2 * n].split_at_mut(n);
    if root.public_key(x, y).is_err() {
        return fail!(Error::BadCurve);
    }
    Ok(hash.digest(curve.hash_algo(), &xy[..2 * n])?)
}

/// Signs payloads with a root key and a code signing key.
pub struct Signer<'a> {
    /// The root key.
    pub root: &'a mut dyn ecdsa::Sign,
    /// The code signing key; it must be on the root key's curve.
    pub csk: &'a mut dyn ecdsa::Sign,
    /// The cancellation id to record for `csk`.
    pub csk_id: u32,
    /// The permissions to grant `csk`.
    pub csk_permissions: BitFlags<Permission>,
    /// A hash engine, for the content digest.
    pub hash: &'a mut dyn hash::Engine,
}

impl Signer<'_> {
    /// Signs `content` as a payload of type `pc_type`.
    ///
    /// The content is zero-padded to a multiple of 128 bytes.
    pub fn sign(
        &mut self,
        pc_type: PcType,
        flags: BitFlags<PcFlag>,
        content: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let curve = self.root.curve();
        if self.csk.curve() != curve {
            return fail!(Error::BadCurve);
        }

        let mut csk = CskEntry {
            magic: Magic::CskEntry.to_wire_value(),
            key: public_key(&*self.csk)?,
            ..Default::default()
        };
        csk.key.permissions = self.csk_permissions.bits();
        csk.key.key_id = self.csk_id;
        csk.sig = sign(&mut *self.root, csk.key.as_bytes())?;

        let content = pad(content);
        let b0 = self.block0(curve, pc_type, flags, &content)?;
        let b0_entry = Block0Entry {
            magic: Magic::Block0Entry.to_wire_value(),
            sig: sign(&mut *self.csk, b0.as_bytes())?,
        };

        let mut out = Vec::with_capacity(
            block::SIGNATURE_LEN as usize + content.len(),
        );
        out.extend_from_slice(b0.as_bytes());
        out.extend_from_slice(Block1Header::new().as_bytes());
        out.extend_from_slice(root_entry(&*self.root)?.as_bytes());
        out.extend_from_slice(csk.as_bytes());
        out.extend_from_slice(b0_entry.as_bytes());
        out.resize(block::SIGNATURE_LEN as usize, 0);
        out.extend_from_slice(&content);
        Ok(out)
    }

    /// Builds a certificate cancelling CSK `csk_id` for payloads of type
    /// `pc_type`, signed directly by the root key.
    ///
    /// `csk_id` is not range-checked, so that tests can build invalid
    /// certificates.
    pub fn cancellation_cert(
        &mut self,
        pc_type: PcType,
        csk_id: u32,
    ) -> Result<Vec<u8>, Error> {
        let curve = self.root.curve();
        let cert = CancellationCert {
            csk_id,
            reserved: [0; 31],
        };
        let content = cert.as_bytes();
        let b0 = self.block0(
            curve,
            pc_type,
            PcFlag::KeyCancellation.into(),
            content,
        )?;
        let b0_entry = Block0Entry {
            magic: Magic::Block0Entry.to_wire_value(),
            sig: sign(&mut *self.root, b0.as_bytes())?,
        };

        let mut out = Vec::new();
        out.extend_from_slice(b0.as_bytes());
        out.extend_from_slice(Block1Header::new().as_bytes());
        out.extend_from_slice(root_entry(&*self.root)?.as_bytes());
        out.extend_from_slice(b0_entry.as_bytes());
        out.resize(block::SIGNATURE_LEN as usize, 0);
        out.extend_from_slice(content);
        Ok(out)
    }

    fn block0(
        &mut self,
        curve: Curve,
        pc_type: PcType,
        flags: BitFlags<PcFlag>,
        content: &[u8],
    ) -> Result<Block0, Error> {
        let mut b0 = Block0 {
            magic: Magic::Block0.to_wire_value(),
            pc_length: content.len() as u32,
            pc_type: pc_type.to_wire_value() as u32 | flags.bits(),
            ..Default::default()
        };
        let digest = match curve {
            Curve::P256 => b0.hash256.as_bytes_mut(),
            Curve::P384 => b0.hash384.as_bytes_mut(),
        };
        self.hash
            .contiguous_hash(curve.hash_algo(), content, digest)?;
        Ok(b0)
    }
}

impl Block1Header {
    fn new() -> Self {
        Self {
            magic: Magic::Block1.to_wire_value(),
            reserved: [0; 3],
        }
    }
}

fn pad(content: &[u8]) -> Vec<u8> {
    let mut padded = content.to_vec();
    let len = (padded.len() + 127) / 128 * 128;
    padded.resize(len.max(128), 0);
    padded
}

fn public_key(key: &dyn ecdsa::Sign) -> Result<KeyBody, Error> {
    let curve = key.curve();
    let n = curve.scalar_bytes();
    let (mut x, mut y) = ([0; 48], [0; 48]);
    if key.public_key(&mut x[..n], &mut y[..n]).is_err() {
        return fail!(Error::BadCurve);
    }
    Ok(KeyBody {
        curve_magic: CurveMagic::from(curve).to_wire_value(),
        x: block::scalar_from_be(&x[..n]),
        y: block::scalar_from_be(&y[..n]),
        ..Default::default()
    })
}

fn root_entry(root: &dyn ecdsa::Sign) -> Result<RootEntry, Error> {
    let mut key = public_key(root)?;
    key.permissions = !0;
    key.key_id = !0;
    Ok(RootEntry {
        magic: Magic::RootEntry.to_wire_value(),
        key,
    })
}

fn sign(key: &mut dyn ecdsa::Sign, message: &[u8]) -> Result<SigBody, Error> {
    let curve = key.curve();
    let n = curve.scalar_bytes();
    let (mut r, mut s) = ([0; 48], [0; 48]);
    if key.sign(message, &mut r[..n], &mut s[..n]).is_err() {
        return fail!(Error::BadSignature);
    }
    Ok(SigBody {
        sig_magic: SigMagic::for_curve(curve).to_wire_value(),
        r: block::scalar_from_be(&r[..n]),
        s: block::scalar_from_be(&s[..n]),
    })
}
