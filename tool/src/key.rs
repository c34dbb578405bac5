// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Key management commands.

use std::io::Write as _;
use std::path::PathBuf;

use pfr::crypto::ecdsa::Curve;
use pfr::crypto::ring;
use pfr::keychain::owned;

use crate::util::parse_curve;

/// Commands for creating keys and provisioning their hashes.
#[derive(structopt::StructOpt)]
pub enum Key {
    /// Generate a new PKCS#8-encoded ECDSA private key.
    GenKey {
        /// The curve to generate a key on: p256 or p384.
        #[structopt(long, parse(try_from_str = parse_curve), default_value = "p384")]
        curve: Curve,

        /// Output file, defaults to stdout.
        #[structopt(short = "o", long, parse(from_os_str))]
        output: Option<PathBuf>,
    },

    /// Print the provisioned hash of a root key, as hex.
    RootKeyHash {
        /// The curve the key lies on: p256 or p384.
        #[structopt(long, parse(try_from_str = parse_curve), default_value = "p384")]
        curve: Curve,

        /// PKCS#8-encoded root key.
        #[structopt(long, parse(from_os_str))]
        key: PathBuf,
    },
}

impl Key {
    pub fn run(self) {
        match self {
            Self::GenKey { curve, output } => {
                let (_, mut w) = crate::util::stdio(None, output.as_deref());
                let (_, pkcs8) = check!(
                    ring::ecdsa::Signer::generate(curve),
                    "failed to generate key"
                );
                check!(w.write_all(&pkcs8), "failed to write key");
            }

            Self::RootKeyHash { curve, key } => {
                let root = crate::util::load_key(&key, curve);
                let digest = check!(
                    owned::root_key_hash(&root, &mut ring::hash::Engine::new()),
                    "failed to hash root key"
                );

                let hex = digest
                    .as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>();
                println!("{}", hex);
            }
        }
    }
}
