// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Persistent CSK cancellation policy.
//!
//! Each content type owns a 128-bit table of CSK ids, stored as four NVM
//! words. Key `k` is bit `31 - k % 32` of word `k / 32`; a set bit means the
//! key is valid, so an erased table cancels nothing. Cancelling a key clears
//! its bit, and there is no way to set one again.

use crate::crypto::ecdsa;
use crate::crypto::hash;
use crate::hardware::flash::Flash;
use crate::hardware::flash::FlashExt as _;
use crate::hardware::flash::Ptr;
use crate::hardware::nvm::Nvm;
use crate::hardware::Device;
use crate::hardware::Mux;
use crate::keychain::block;
use crate::keychain::check_key_cancellation_cert;
use crate::keychain::ChainShape;
use crate::keychain::Error;
use crate::keychain::PcType;
use crate::keychain::Verifier;
use crate::wire::WireEnum as _;
use crate::Result;

/// The largest CSK id that can be cancelled.
pub const MAX_KEY_ID: u32 = 127;

/// NVM words per content type.
pub const WORDS_PER_TYPE: u32 = 4;

/// The key cancellation table, backed by NVM.
pub struct KeyCancellation<N> {
    nvm: N,
    base: u32,
}

impl<N: Nvm> KeyCancellation<N> {
    /// Creates a new `KeyCancellation` whose table starts at word `base`.
    pub fn new(nvm: N, base: u32) -> Self {
        Self { nvm, base }
    }

    /// Returns the backing NVM.
    pub fn nvm(&self) -> &N {
        &self.nvm
    }

    /// Returns the backing NVM, mutably.
    ///
    /// The cancellation table itself must only be changed through
    /// [`KeyCancellation::cancel_key()`].
    pub fn nvm_mut(&mut self) -> &mut N {
        &mut self.nvm
    }

    /// Returns the NVM word index and bit mask for `key_id`.
    fn locate(&self, pc_type: PcType, key_id: u32) -> Option<(u32, u32)> {
        if key_id > MAX_KEY_ID {
            return None;
        }
        let word = self.base
            + pc_type.to_wire_value() as u32 * WORDS_PER_TYPE
            + key_id / 32;
        Some((word, 1 << (31 - key_id % 32)))
    }

    /// Returns whether `key_id` may sign content of type `pc_type`.
    ///
    /// Ids above [`MAX_KEY_ID`] are never valid, and neither is any id whose
    /// table cannot be read.
    pub fn is_key_valid(&self, pc_type: PcType, key_id: u32) -> bool {
        let (word, mask) = match self.locate(pc_type, key_id) {
            Some(loc) => loc,
            None => return false,
        };
        match self.nvm.read_word(word) {
            Ok(bits) => bits & mask != 0,
            Err(_) => false,
        }
    }

    /// Cancels `key_id` for content of type `pc_type`.
    ///
    /// Cancelling an already-cancelled key does not touch NVM.
    pub fn cancel_key(
        &mut self,
        pc_type: PcType,
        key_id: u32,
    ) -> Result<(), Error> {
        let (word, mask) = match self.locate(pc_type, key_id) {
            Some(loc) => loc,
            None => return fail!(Error::BadKeyId),
        };
        let bits = self.nvm.read_word(word)?;
        if bits & mask == 0 {
            return Ok(());
        }
        info!("cancelling CSK {} for {}", key_id, pc_type);
        self.nvm.write_word(word, bits & !mask)?;
        Ok(())
    }
}

/// Returns whether CSK `key_id` is unused by the live images that keys of
/// `pc_type` sign.
///
/// Only PFM keys are checked: a PFM key is in use if it signed the active
/// PFM, or the PFM inside the recovery capsule, of its device. This selects
/// that device on `flash`.
pub fn is_key_unused<F, H, V, N>(
    verifier: &Verifier<'_, H, V, N>,
    flash: &mut F,
    pc_type: PcType,
    key_id: u32,
) -> Result<bool, Error>
where
    F: Flash + Mux + ?Sized,
    H: hash::Engine,
    V: ecdsa::Verify,
    N: Nvm,
{
    let device = match pc_type.pfm_device() {
        Some(device) => device,
        None => return Ok(true),
    };
    flash.select(device);
    let layout = verifier.provisioning().layout(device);

    for &pfm in &[layout.active, layout.recovery + block::SIGNATURE_LEN] {
        let csk = pfm + block::BLOCK0_LEN + block::CSK_ENTRY_OFFSET;
        // The key id sits after the entry magic, curve, and permissions.
        let id = flash.read_u32(Ptr::new(csk + 12))?;
        if id == key_id {
            warn!("CSK {} signs the {} PFM at {:#x}", key_id, device, pfm);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Authenticates the key cancellation certificate at `addr` on `device`, and
/// applies it.
///
/// A certificate naming a key that still signs a live image is refused with
/// [`Error::KeyInUse`]. Returns the content type and key id cancelled.
pub fn process_cancellation_cert<F, H, V, N>(
    verifier: &mut Verifier<'_, H, V, N>,
    flash: &mut F,
    device: Device,
    addr: u32,
) -> Result<(PcType, u32), Error>
where
    F: Flash + Mux + ?Sized,
    H: hash::Engine,
    V: ecdsa::Verify,
    N: Nvm,
{
    flash.select(device);
    let payload = verifier.verify_signed_payload(&*flash, addr)?;
    check!(
        payload.shape() == ChainShape::KeyCancellation,
        Error::WrongType
    );
    let key_id =
        check_key_cancellation_cert(&*flash, payload.content().ptr.address)?;

    check!(
        is_key_unused(verifier, flash, payload.pc_type, key_id)?,
        Error::KeyInUse
    );
    verifier
        .key_cancellation_mut()
        .cancel_key(payload.pc_type, key_id)?;
    Ok((payload.pc_type, key_id))
}
