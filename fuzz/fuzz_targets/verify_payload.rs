// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fuzz tests for signed payload authentication, with signature checks
//! disabled so that the chain walk itself is exercised.

#![no_main]

use libfuzzer_sys::fuzz_target;

use pfr::crypto::ecdsa;
use pfr::crypto::ring;
use pfr::hardware::flash::Ram;
use pfr::hardware::nvm;
use pfr::keychain::Verifier;
use pfr::provision::Layout;
use pfr::provision::Provisioning;

/// An `ecdsa::Verify` that accepts everything, since signature
/// verification is irrelevant for the purposes of this test.
struct NoCheckEcdsa;

impl ecdsa::Verify for NoCheckEcdsa {
    fn verify(
        &mut self,
        _: ecdsa::PublicKey,
        _: &[u8],
        _: ecdsa::Signature,
    ) -> Result<(), ecdsa::Error> {
        Ok(())
    }
}

struct ErasedNvm;

impl nvm::Nvm for ErasedNvm {
    fn read_word(&self, _: u32) -> Result<u32, nvm::Error> {
        Ok(!0)
    }

    fn write_word(&mut self, _: u32, _: u32) -> Result<(), nvm::Error> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let layout = Layout {
        active: 0,
        recovery: 0,
        staging: 0,
        afm: None,
    };
    let prov = Provisioning {
        root_key_hash_256: [0; 32],
        root_key_hash_384: [0; 48],
        bmc: layout,
        pch: layout,
        limits: Default::default(),
        smbus: Default::default(),
        nvm: Default::default(),
    };

    let mut verifier = Verifier::new(
        &prov,
        ring::hash::Engine::new(),
        NoCheckEcdsa,
        ErasedNvm,
    );
    let _ = verifier.verify_signed_payload(&Ram(data), 0);
});
