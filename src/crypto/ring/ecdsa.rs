// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of ECDSA based on `ring`.
//!
//! Verification uses the fixed-width (PKCS#11-style) signature encoding,
//! which is `r || s` with each scalar padded to the curve's width.
//! Signing requires the `std` feature flag to be enabled.

use arrayvec::ArrayVec;

use ring::signature::EcdsaVerificationAlgorithm as EcdsaAlgo;
use ring::signature::UnparsedPublicKey;

use crate::crypto::ecdsa;
use crate::crypto::ecdsa::Curve;

#[cfg(feature = "std")]
pub use signer::Signer;

/// Uncompressed SEC1 point: a tag byte plus two P-384 coordinates.
type PointBuf = ArrayVec<u8, 97>;

fn verify_algo(curve: Curve) -> &'static EcdsaAlgo {
    match curve {
        Curve::P256 => &ring::signature::ECDSA_P256_SHA256_FIXED,
        Curve::P384 => &ring::signature::ECDSA_P384_SHA384_FIXED,
    }
}

fn sec1_point(key: &ecdsa::PublicKey) -> Result<PointBuf, ecdsa::Error> {
    let n = key.curve.scalar_bytes();
    if key.x.len() != n || key.y.len() != n {
        return Err(ecdsa::Error::BadKey);
    }
    let mut point = PointBuf::new();
    point.push(0x04);
    point
        .try_extend_from_slice(key.x)
        .and_then(|_| point.try_extend_from_slice(key.y))
        .map_err(|_| ecdsa::Error::BadKey)?;
    Ok(point)
}

/// A `ring`-based [`ecdsa::Verify`] for both supported curves.
#[derive(Default)]
pub struct Verifier {
    _priv: (),
}

impl Verifier {
    /// Creates a new `Verifier`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ecdsa::Verify for Verifier {
    fn verify(
        &mut self,
        key: ecdsa::PublicKey,
        message: &[u8],
        signature: ecdsa::Signature,
    ) -> Result<(), ecdsa::Error> {
        let n = key.curve.scalar_bytes();
        if signature.r.len() != n || signature.s.len() != n {
            return Err(ecdsa::Error::BadKey);
        }
        let point = sec1_point(&key)?;

        let mut fixed = ArrayVec::<u8, 96>::new();
        fixed
            .try_extend_from_slice(signature.r)
            .and_then(|_| fixed.try_extend_from_slice(signature.s))
            .map_err(|_| ecdsa::Error::BadKey)?;

        UnparsedPublicKey::new(verify_algo(key.curve), &point[..])
            .verify(message, &fixed)
            .map_err(|_| ecdsa::Error::BadSignature)
    }
}

#[cfg(feature = "std")]
mod signer {
    use ring::rand::SystemRandom;
    use ring::signature::EcdsaKeyPair;
    use ring::signature::EcdsaSigningAlgorithm;
    use ring::signature::KeyPair as _;

    use crate::crypto::ecdsa;
    use crate::crypto::ecdsa::Curve;

    fn signing_algo(curve: Curve) -> &'static EcdsaSigningAlgorithm {
        match curve {
            Curve::P256 => &ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            Curve::P384 => &ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING,
        }
    }

    /// A `ring`-based [`ecdsa::Sign`], producing fixed-width signatures.
    pub struct Signer {
        keypair: EcdsaKeyPair,
        curve: Curve,
        rng: SystemRandom,
    }

    impl Signer {
        /// Generates a fresh keypair on `curve`, returning the signer along
        /// with the PKCS#8 encoding of its private key.
        pub fn generate(curve: Curve) -> Result<(Self, Vec<u8>), ecdsa::Error> {
            let rng = SystemRandom::new();
            let pkcs8 = EcdsaKeyPair::generate_pkcs8(signing_algo(curve), &rng)
                .map_err(|_| ecdsa::Error::Unspecified)?;
            let signer = Self::from_pkcs8(curve, pkcs8.as_ref())?;
            Ok((signer, pkcs8.as_ref().to_vec()))
        }

        /// Creates a new `Signer` from the given PKCS#8-encoded private key.
        ///
        /// Returns an error if the key fails to parse.
        pub fn from_pkcs8(
            curve: Curve,
            pkcs8: &[u8],
        ) -> Result<Self, ecdsa::Error> {
            let keypair = EcdsaKeyPair::from_pkcs8(signing_algo(curve), pkcs8)
                .map_err(|_| ecdsa::Error::BadKey)?;
            Ok(Self {
                keypair,
                curve,
                rng: SystemRandom::new(),
            })
        }
    }

    impl ecdsa::Sign for Signer {
        fn curve(&self) -> Curve {
            self.curve
        }

        fn public_key(
            &self,
            x: &mut [u8],
            y: &mut [u8],
        ) -> Result<(), ecdsa::Error> {
            let n = self.curve.scalar_bytes();
            let point = self.keypair.public_key().as_ref();
            if x.len() != n || y.len() != n || point.len() != 1 + 2 * n {
                return Err(ecdsa::Error::BadKey);
            }
            x.copy_from_slice(&point[1..1 + n]);
            y.copy_from_slice(&point[1 + n..]);
            Ok(())
        }

        fn sign(
            &mut self,
            message: &[u8],
            r: &mut [u8],
            s: &mut [u8],
        ) -> Result<(), ecdsa::Error> {
            let n = self.curve.scalar_bytes();
            let sig = self
                .keypair
                .sign(&self.rng, message)
                .map_err(|_| ecdsa::Error::Unspecified)?;
            let sig = sig.as_ref();
            if r.len() != n || s.len() != n || sig.len() != 2 * n {
                return Err(ecdsa::Error::Unspecified);
            }
            r.copy_from_slice(&sig[..n]);
            s.copy_from_slice(&sig[n..]);
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::ecdsa::Sign as _;
    use crate::crypto::ecdsa::Verify as _;

    fn sign_and_verify(curve: Curve) {
        let (mut signer, _) = Signer::generate(curve).unwrap();
        let n = curve.scalar_bytes();
        let (mut x, mut y) = (vec![0; n], vec![0; n]);
        signer.public_key(&mut x, &mut y).unwrap();
        let (mut r, mut s) = (vec![0; n], vec![0; n]);
        signer.sign(b"block zero", &mut r, &mut s).unwrap();

        let key = ecdsa::PublicKey {
            curve,
            x: &x,
            y: &y,
        };
        let mut verifier = Verifier::new();
        verifier
            .verify(key, b"block zero", ecdsa::Signature { r: &r, s: &s })
            .unwrap();
        assert_eq!(
            verifier.verify(
                key,
                b"block one",
                ecdsa::Signature { r: &r, s: &s }
            ),
            Err(ecdsa::Error::BadSignature)
        );
        assert_eq!(
            verifier.verify(
                key,
                b"block zero",
                ecdsa::Signature {
                    r: &r[1..],
                    s: &s
                }
            ),
            Err(ecdsa::Error::BadKey)
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn p256() {
        sign_and_verify(Curve::P256);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn p384() {
        sign_and_verify(Curve::P384);
    }
}
