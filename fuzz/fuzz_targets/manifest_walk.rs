// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Fuzz tests for the manifest header and definition walker.

#![no_main]

use libfuzzer_sys::fuzz_target;

use pfr::hardware::flash::Ram;
use pfr::manifest;
use pfr::manifest::Tag;

fuzz_target!(|data: &[u8]| {
    let flash = Ram(data);
    for &tag in &[Tag::Pfm, Tag::Afm] {
        if let Ok((_, body)) = manifest::read_header(&flash, 0, tag) {
            let _ = manifest::for_each_definition(&flash, body, |_| Ok(()));
        }
    }
});
