// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Signature chain verification.
//!
//! Every image `pfr` trusts is wrapped in a *signed payload*: a 1 KiB
//! signature (Block0 and Block1, see [`block`]) followed by the protected
//! content. Block0 carries the type, length, and digest of the content;
//! Block1 carries a key chain rooted at a provisioned key hash:
//!
//! ```text
//! root key --signs--> code signing key (CSK) --signs--> Block0
//! ```
//!
//! A key cancellation certificate uses a shorter chain, in which the root key
//! signs Block0 directly. See [`ChainShape`].
//!
//! [`Verifier`] walks the chain in a fixed order, and stops at the first
//! failed check. It never writes to flash or NVM.

use enumflags2::bitflags;
use enumflags2::BitFlags;
use zerocopy::AsBytes as _;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::Curve;
use crate::crypto::hash;
use crate::crypto::hash::EngineExt as _;
use crate::hardware::flash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::flash::Region;
use crate::hardware::nvm;
use crate::hardware::nvm::Nvm;
use crate::hardware::Device;
use crate::provision::Provisioning;
use crate::Result;
use crate::wire::WireEnum as _;

pub mod block;
pub mod cancel;

#[cfg(feature = "std")]
pub mod owned;

use block::Block0;
use block::Block0Entry;
use block::Block1Header;
use block::CancellationCert;
use block::CskEntry;
use block::CurveMagic;
use block::KeyBody;
use block::Magic;
use block::RootEntry;
use block::SigBody;
use block::SigMagic;

pub use cancel::KeyCancellation;

/// Errors returned by signature chain verification.
///
/// These are deliberately coarse; they exist for logging and tests, and
/// callers are expected to treat every one of them as "not authentic".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that a magic number did not match.
    BadMagic,

    /// Indicates that Block0 declared a content type or length outside of
    /// policy.
    BadLength,

    /// Indicates that a reserved field was not zero.
    BadReserved,

    /// Indicates an unknown curve, or a curve that did not match the rest of
    /// the chain.
    BadCurve,

    /// Indicates that a key lacked the permissions its position requires.
    BadPermissions,

    /// Indicates that the CSK has been cancelled.
    CancelledKey,

    /// Indicates that a key id was out of range.
    BadKeyId,

    /// Indicates that a signature failed to verify.
    BadSignature,

    /// Indicates that a digest did not match.
    BadHash,

    /// Indicates that a payload was authentic, but not of the expected
    /// content type.
    WrongType,

    /// Indicates an attempt to cancel a key that signs a live image.
    KeyInUse,

    /// Indicates that a flash operation failed.
    Flash,

    /// Indicates that the hash engine failed.
    Hash,

    /// Indicates that NVM could not be accessed.
    Nvm,
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

impl From<nvm::Error> for Error {
    fn from(_: nvm::Error) -> Self {
        Self::Nvm
    }
}

debug_from!(@plain Error => flash::Error, hash::Error, nvm::Error);

wire_enum! {
    /// The type of a signed payload's protected content.
    ///
    /// On flash, this is the low byte of `Block0.pc_type`; the bits above it
    /// are [`PcFlag`]s.
    pub enum PcType: u8 {
        /// A CPLD (controller) update capsule.
        CpldUpdateCapsule = 0,
        /// A PCH platform firmware manifest.
        PchPfm = 1,
        /// A PCH firmware update capsule.
        PchUpdateCapsule = 2,
        /// A BMC platform firmware manifest.
        BmcPfm = 3,
        /// A BMC firmware update capsule.
        BmcUpdateCapsule = 4,
        /// A PCH seamless (single-FV) update capsule.
        PchSeamlessCapsule = 5,
        /// An attestation manifest.
        Afm = 6,
    }
}

impl PcType {
    /// Returns the CSK permission needed to sign content of this type.
    pub fn required_permission(self) -> Permission {
        match self {
            Self::CpldUpdateCapsule => Permission::CpldUpdateCapsule,
            Self::PchPfm => Permission::PchPfm,
            Self::PchUpdateCapsule | Self::PchSeamlessCapsule => {
                Permission::PchUpdateCapsule
            }
            Self::BmcPfm => Permission::BmcPfm,
            Self::BmcUpdateCapsule => Permission::BmcUpdateCapsule,
            Self::Afm => Permission::Afm,
        }
    }

    /// Returns the PFM type for `device`.
    pub fn pfm_for(device: Device) -> Self {
        match device {
            Device::Bmc => Self::BmcPfm,
            Device::Pch => Self::PchPfm,
        }
    }

    /// Returns the update capsule type for `device`.
    pub fn capsule_for(device: Device) -> Self {
        match device {
            Device::Bmc => Self::BmcUpdateCapsule,
            Device::Pch => Self::PchUpdateCapsule,
        }
    }

    /// If this is a PFM type, returns the device whose images it describes.
    pub fn pfm_device(self) -> Option<Device> {
        match self {
            Self::PchPfm => Some(Device::Pch),
            Self::BmcPfm => Some(Device::Bmc),
            _ => None,
        }
    }
}

/// Flags carried in `Block0.pc_type` above the content type.
#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PcFlag {
    /// The content is a key cancellation certificate for keys of the
    /// content type.
    KeyCancellation = 1 << 8,
    /// The content is a decommission capsule.
    Decommission = 1 << 9,
}

/// Permissions a CSK may be granted.
#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Permission {
    /// May sign a PCH PFM.
    PchPfm = 0b1,
    /// May sign a PCH update capsule.
    PchUpdateCapsule = 0b10,
    /// May sign a BMC PFM.
    BmcPfm = 0b100,
    /// May sign a BMC update capsule.
    BmcUpdateCapsule = 0b1000,
    /// May sign a CPLD update capsule.
    CpldUpdateCapsule = 0b10000,
    /// May sign an attestation manifest.
    Afm = 0b100000,
}

/// The shape of a Block1 key chain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChainShape {
    /// Root, CSK, and Block0 entries.
    Standard,
    /// Root and Block0 entries only; the root signs Block0 directly.
    KeyCancellation,
}

impl ChainShape {
    /// Selects a shape from the flags in `Block0.pc_type`.
    pub fn of(flags: BitFlags<PcFlag>) -> Self {
        if flags.contains(PcFlag::KeyCancellation) {
            Self::KeyCancellation
        } else {
            Self::Standard
        }
    }

    /// Returns the offset of the Block0 entry within Block1.
    pub fn b0_entry_offset(self) -> u32 {
        match self {
            Self::Standard => block::B0_ENTRY_OFFSET,
            Self::KeyCancellation => block::CSK_ENTRY_OFFSET,
        }
    }
}

/// A description of an authenticated signed payload.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Payload {
    /// The flash address of the payload's signature.
    pub addr: u32,
    /// The content type.
    pub pc_type: PcType,
    /// The flags above the content type.
    pub flags: BitFlags<PcFlag>,
    /// The length of the protected content.
    pub pc_length: u32,
    /// The curve of the whole chain.
    pub curve: Curve,
    /// The id of the CSK that signed Block0, for the standard shape.
    pub csk_id: Option<u32>,
}

impl Payload {
    /// Returns the region of flash holding the protected content.
    pub fn content(&self) -> Region {
        Region::new(self.addr + block::SIGNATURE_LEN, self.pc_length)
    }

    /// Returns the length of the whole signed payload, signature included.
    pub fn signed_len(&self) -> u32 {
        block::SIGNATURE_LEN + self.pc_length
    }

    /// Returns the chain shape this payload was verified with.
    pub fn shape(&self) -> ChainShape {
        ChainShape::of(self.flags)
    }
}

/// Returns the length of the signed payload at `addr`, including its
/// signature, without authenticating it.
pub fn signed_payload_size<F: Flash + ?Sized>(
    flash: &F,
    addr: u32,
) -> Result<u32, Error> {
    let pc_length = flash.read_u32(Ptr::new(addr + 4))?;
    match pc_length.checked_add(block::SIGNATURE_LEN) {
        Some(len) => Ok(len),
        None => fail!(Error::BadLength),
    }
}

/// Checks the protected content of a key cancellation certificate at
/// `pc_addr`, returning the CSK id it cancels.
///
/// This reads content that has not been authenticated yet; it only
/// constrains its shape.
pub fn check_key_cancellation_cert<F: Flash + ?Sized>(
    flash: &F,
    pc_addr: u32,
) -> Result<u32, Error> {
    let cert = flash.read_object::<CancellationCert>(Ptr::new(pc_addr))?;
    check!(cert.reserved.iter().all(|&w| w == 0), Error::BadReserved);
    check!(cert.csk_id <= cancel::MAX_KEY_ID, Error::BadKeyId);
    Ok(cert.csk_id)
}

/// Digests `region` of `flash` with `algo`.
///
/// The region is streamed through a small stack buffer, so it may be of any
/// length.
pub fn hash_flash<F, H>(
    flash: &F,
    hash: &mut H,
    algo: hash::Algo,
    region: Region,
) -> Result<hash::Digest, Error>
where
    F: Flash + ?Sized,
    H: hash::Engine + ?Sized,
{
    const CHUNK: u32 = 256;
    let mut buf = [0; CHUNK as usize];

    let mut h = hash.new_hash(algo)?;
    let mut offset = 0;
    while offset < region.len {
        let len = CHUNK.min(region.len - offset);
        let chunk = &mut buf[..len as usize];
        flash.read(Ptr::new(region.ptr.address + offset), chunk)?;
        h.write(chunk)?;
        offset += len;
    }
    Ok(h.finish_digest()?)
}

/// Authenticates signed payloads against the provisioned root keys and the
/// key cancellation policy.
pub struct Verifier<'p, H, V, N> {
    prov: &'p Provisioning,
    hash: H,
    ecdsa: V,
    cancellation: KeyCancellation<N>,
}

impl<'p, H, V, N> Verifier<'p, H, V, N>
where
    H: hash::Engine,
    V: ecdsa::Verify,
    N: Nvm,
{
    /// Creates a new `Verifier`.
    ///
    /// The key cancellation table is read from `nvm` at the word offset
    /// named in `prov`.
    pub fn new(prov: &'p Provisioning, hash: H, ecdsa: V, nvm: N) -> Self {
        Self {
            prov,
            hash,
            ecdsa,
            cancellation: KeyCancellation::new(nvm, prov.nvm.key_cancellation),
        }
    }

    /// Returns the provisioned configuration.
    pub fn provisioning(&self) -> &'p Provisioning {
        self.prov
    }

    /// Returns the hash engine, for hashing authenticated content.
    pub fn hash_engine(&mut self) -> &mut H {
        &mut self.hash
    }

    /// Returns the key cancellation policy.
    pub fn key_cancellation(&self) -> &KeyCancellation<N> {
        &self.cancellation
    }

    /// Returns the key cancellation policy, mutably.
    pub fn key_cancellation_mut(&mut self) -> &mut KeyCancellation<N> {
        &mut self.cancellation
    }

    /// Returns whether the signed payload at `addr` is authentic.
    pub fn is_signed_payload_valid<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        addr: u32,
    ) -> bool {
        self.verify_signed_payload(flash, addr).is_ok()
    }

    /// Authenticates the signed payload at `addr`, and additionally requires
    /// it to be an ordinary (standard chain, unflagged) payload of type
    /// `expected`.
    pub fn verify_as<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        addr: u32,
        expected: PcType,
    ) -> Result<Payload, Error> {
        let payload = self.verify_signed_payload(flash, addr)?;
        check!(
            payload.pc_type == expected && payload.flags.is_empty(),
            Error::WrongType
        );
        Ok(payload)
    }

    /// Authenticates the signed payload at `addr`.
    pub fn verify_signed_payload<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        addr: u32,
    ) -> Result<Payload, Error> {
        trace!("verifying signed payload at {:#x}", addr);
        let b0 = flash.read_object::<Block0>(Ptr::new(addr))?;
        let flags = BitFlags::<PcFlag>::from_bits_truncate(b0.pc_type);
        let shape = ChainShape::of(flags);
        let pc_addr = match addr.checked_add(block::SIGNATURE_LEN) {
            Some(a) => a,
            None => return fail!(Error::BadLength),
        };

        if shape == ChainShape::KeyCancellation {
            check_key_cancellation_cert(flash, pc_addr)?;
        }

        let b1 = addr + block::BLOCK0_LEN;
        let header = flash.read_object::<Block1Header>(Ptr::new(b1))?;
        check!(
            Magic::from_wire_value(header.magic) == Some(Magic::Block1),
            Error::BadMagic
        );
        check!(header.reserved.iter().all(|&w| w == 0), Error::BadReserved);

        let root = flash.read_object::<RootEntry>(Ptr::new(
            b1 + block::ROOT_ENTRY_OFFSET,
        ))?;
        let curve = self.check_root_entry(&root)?;

        let pc_type = PcType::from_wire_value(b0.pc_type as u8);
        let b0_entry = flash.read_object::<Block0Entry>(Ptr::new(
            b1 + shape.b0_entry_offset(),
        ))?;

        let csk_id = match shape {
            ChainShape::Standard => {
                let csk = flash.read_object::<CskEntry>(Ptr::new(
                    b1 + block::CSK_ENTRY_OFFSET,
                ))?;
                self.check_csk_entry(&root.key, curve, &csk, pc_type)?;
                check!(
                    b0_entry.sig.sig_magic == csk.sig.sig_magic,
                    Error::BadCurve
                );
                self.check_b0_entry(&csk.key, curve, &b0_entry, &b0)?;
                Some(csk.key.key_id)
            }
            ChainShape::KeyCancellation => {
                self.check_b0_entry(&root.key, curve, &b0_entry, &b0)?;
                None
            }
        };

        let pc_type = self.check_block0(flash, &b0, flags, &b0_entry, pc_addr)?;
        Ok(Payload {
            addr,
            pc_type,
            flags,
            pc_length: b0.pc_length,
            curve,
            csk_id,
        })
    }

    /// Checks the root entry against the provisioned root key hash,
    /// returning the chain's curve.
    fn check_root_entry(&mut self, root: &RootEntry) -> Result<Curve, Error> {
        check!(
            Magic::from_wire_value(root.magic) == Some(Magic::RootEntry),
            Error::BadMagic
        );
        check!(
            root.key.permissions == !0 && root.key.key_id == !0,
            Error::BadPermissions
        );
        check!(root.key.reserved.iter().all(|&w| w == 0), Error::BadReserved);
        let curve = match CurveMagic::from_wire_value(root.key.curve_magic) {
            Some(magic) => magic.curve(),
            None => return fail!(Error::BadCurve),
        };

        let n = curve.scalar_bytes();
        let algo = curve.hash_algo();
        let x = block::scalar_to_be(&root.key.x, curve);
        let y = block::scalar_to_be(&root.key.y, curve);
        let mut h = self.hash.new_hash(algo)?;
        h.write(&x[..n])?;
        h.write(&y[..n])?;
        let digest = h.finish_digest()?;

        let expected: &[u8] = match curve {
            Curve::P256 => &self.prov.root_key_hash_256,
            Curve::P384 => &self.prov.root_key_hash_384,
        };
        check!(digest.matches(expected), Error::BadHash);
        Ok(curve)
    }

    fn check_csk_entry(
        &mut self,
        root: &KeyBody,
        curve: Curve,
        csk: &CskEntry,
        pc_type: Option<PcType>,
    ) -> Result<(), Error> {
        check!(
            Magic::from_wire_value(csk.magic) == Some(Magic::CskEntry),
            Error::BadMagic
        );
        check!(
            CurveMagic::from_wire_value(csk.key.curve_magic)
                == Some(CurveMagic::from(curve)),
            Error::BadCurve
        );

        let pc_type = match pc_type {
            Some(ty) => ty,
            None => return fail!(Error::BadPermissions),
        };
        let permissions = BitFlags::<Permission>::from_bits_truncate(
            csk.key.permissions,
        );
        check!(
            permissions.contains(pc_type.required_permission()),
            Error::BadPermissions
        );
        check!(
            self.cancellation.is_key_valid(pc_type, csk.key.key_id),
            Error::CancelledKey
        );
        check!(csk.key.reserved.iter().all(|&w| w == 0), Error::BadReserved);
        check!(
            csk.sig.sig_magic == SigMagic::for_curve(curve).to_wire_value(),
            Error::BadCurve
        );

        self.check_signature(root, curve, csk.key.as_bytes(), &csk.sig)
    }

    fn check_b0_entry(
        &mut self,
        signer: &KeyBody,
        curve: Curve,
        entry: &Block0Entry,
        b0: &Block0,
    ) -> Result<(), Error> {
        check!(
            Magic::from_wire_value(entry.magic) == Some(Magic::Block0Entry),
            Error::BadMagic
        );
        check!(
            SigMagic::from_wire_value(entry.sig.sig_magic).map(SigMagic::curve)
                == Some(curve),
            Error::BadCurve
        );

        self.check_signature(signer, curve, b0.as_bytes(), &entry.sig)
    }

    fn check_signature(
        &mut self,
        key: &KeyBody,
        curve: Curve,
        message: &[u8],
        sig: &SigBody,
    ) -> Result<(), Error> {
        let n = curve.scalar_bytes();
        let x = block::scalar_to_be(&key.x, curve);
        let y = block::scalar_to_be(&key.y, curve);
        let r = block::scalar_to_be(&sig.r, curve);
        let s = block::scalar_to_be(&sig.s, curve);

        let result = self.ecdsa.verify(
            ecdsa::PublicKey {
                curve,
                x: &x[..n],
                y: &y[..n],
            },
            message,
            ecdsa::Signature {
                r: &r[..n],
                s: &s[..n],
            },
        );
        check!(result.is_ok(), Error::BadSignature);
        Ok(())
    }

    /// Checks Block0's type and length policy, then the content digest.
    fn check_block0<F: Flash + ?Sized>(
        &mut self,
        flash: &F,
        b0: &Block0,
        flags: BitFlags<PcFlag>,
        b0_entry: &Block0Entry,
        pc_addr: u32,
    ) -> Result<PcType, Error> {
        check!(
            Magic::from_wire_value(b0.magic) == Some(Magic::Block0),
            Error::BadMagic
        );

        let len = b0.pc_length;
        let limits = &self.prov.limits;
        check!(len >= block::BLOCK0_LEN && len % 128 == 0, Error::BadLength);

        let pc_type = match PcType::from_wire_value(b0.pc_type as u8) {
            Some(ty) if b0.pc_type as u8 <= limits.max_pc_type => ty,
            _ => return fail!(Error::BadLength),
        };

        let pch_max = limits
            .max_pch_capsule
            .saturating_sub(block::SIGNATURE_LEN);
        let bmc_max = limits
            .max_bmc_capsule
            .saturating_sub(block::SIGNATURE_LEN);
        if !flags.is_empty() {
            check!(len == block::BLOCK0_LEN, Error::BadLength);
        } else {
            match pc_type {
                PcType::CpldUpdateCapsule => {
                    check!(len == limits.cpld_capsule_len, Error::BadLength)
                }
                PcType::PchPfm
                | PcType::PchUpdateCapsule
                | PcType::PchSeamlessCapsule => {
                    check!(len <= pch_max, Error::BadLength)
                }
                PcType::BmcPfm | PcType::BmcUpdateCapsule => {
                    check!(len <= bmc_max, Error::BadLength)
                }
                PcType::Afm => {}
            }
        }
        check!(
            b0.reserved == 0 && b0.reserved2.iter().all(|&w| w == 0),
            Error::BadReserved
        );
        check!(pc_addr.checked_add(len).is_some(), Error::BadLength);

        let (algo, expected) = match SigMagic::from_wire_value(
            b0_entry.sig.sig_magic,
        ) {
            Some(SigMagic::P256) => (hash::Algo::Sha256, b0.hash256.as_bytes()),
            Some(SigMagic::P384) => (hash::Algo::Sha384, b0.hash384.as_bytes()),
            None => return fail!(Error::BadCurve),
        };
        let digest =
            hash_flash(flash, &mut self.hash, algo, Region::new(pc_addr, len))?;
        check!(digest.matches(expected), Error::BadHash);

        Ok(pc_type)
    }
}
