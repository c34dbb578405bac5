// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fuzz tests for finding and parsing the PBC inside an update capsule.

#![no_main]

use libfuzzer_sys::fuzz_target;

use pfr::hardware::flash::Ram;
use pfr::pbc::PbcCursor;

fuzz_target!(|data: &[u8]| {
    let flash = Ram(data);
    if let Ok(pbc) = PbcCursor::locate(&flash, 0, 0) {
        assert!(pbc.payload().end().is_some());
    }
});
