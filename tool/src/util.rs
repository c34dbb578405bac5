// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! I/O and argument utilities.

use std::fs;
use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use pfr::crypto::ecdsa::Curve;
use pfr::crypto::ring;

/// Like `?`, but crashes the binary with a nice error message.
macro_rules! check {
    ($result:expr, $fmt:literal $(, $args:expr)* $(,)?) => {
        match $result {
            Ok(x) => x,
            Err(e) => {
                eprintln!("error: {}: {:?}", format_args!($fmt, $($args,)*), e);
                std::process::exit(2)
            }
        }
    }
}

/// Opens the given input and output files.
///
/// If either file is missing, it is replaced with stdin or stdout, respectively.
pub fn stdio(
    input_file: Option<&Path>,
    output_file: Option<&Path>,
) -> (Box<dyn Read>, Box<dyn Write>) {
    let input: Box<dyn Read> = match input_file {
        Some(path) => {
            let file =
                check!(File::open(path), "failed to open {}", path.display());
            Box::new(BufReader::new(file))
        }
        None => Box::new(io::stdin()),
    };

    let output: Box<dyn Write> = match output_file {
        Some(path) => {
            let file =
                check!(File::create(path), "failed to create {}", path.display());
            Box::new(file)
        }
        None => Box::new(io::stdout()),
    };

    (input, output)
}

/// Reads all of `r`.
pub fn read_all(mut r: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    check!(r.read_to_end(&mut buf), "failed to read input");
    buf
}

/// Parses a curve name, as accepted on the command line.
pub fn parse_curve(s: &str) -> Result<Curve, String> {
    match s {
        "p256" | "P256" => Ok(Curve::P256),
        "p384" | "P384" => Ok(Curve::P384),
        _ => Err(format!("unknown curve `{}`; expected p256 or p384", s)),
    }
}

/// Loads a PKCS#8-encoded private key on `curve`.
pub fn load_key(path: &Path, curve: Curve) -> ring::ecdsa::Signer {
    let pkcs8 = check!(fs::read(path), "failed to read {}", path.display());
    check!(
        ring::ecdsa::Signer::from_pkcs8(curve, &pkcs8),
        "failed to parse {} as a {:?} key",
        path.display(),
        curve,
    )
}
