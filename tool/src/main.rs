// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `pfr-tool` is a simple command-line tool for producing and inspecting the
//! signed payloads a PFR controller authenticates.
//!
//! Set `RUST_LOG=error` to see why a payload fails verification.

#![deny(missing_docs)]
#![deny(warnings)]
#![deny(unused)]
#![deny(unsafe_code)]

use structopt::StructOpt as _;

#[macro_use]
mod util;

mod key;
mod payload;

/// A command-line tool for working with PFR payloads.
#[allow(missing_docs)]
#[derive(structopt::StructOpt)]
#[structopt(author)]
enum CliCommand {
    #[structopt(flatten)]
    Key(key::Key),
    #[structopt(flatten)]
    Payload(payload::Payload),
}

fn main() {
    env_logger::init();
    match CliCommand::from_args() {
        CliCommand::Key(k) => k.run(),
        CliCommand::Payload(p) => p.run(),
    }
}
