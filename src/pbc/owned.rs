// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! PBC and capsule builders, for host tooling and tests.

use std::collections::BTreeMap;

use zerocopy::AsBytes as _;

use crate::hardware::flash::Region;
use crate::pbc::Error;
use crate::pbc::Header;
use crate::pbc::PAGE_SIZE;
use crate::pbc::PATTERN;
use crate::pbc::PATTERN_SIZE;
use crate::pbc::TAG;
use crate::pbc::VERSION;
use crate::Result;

/// An owned PBC.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pbc {
    erase: Vec<bool>,
    pages: BTreeMap<u32, Vec<u8>>,
}

impl Pbc {
    /// Creates an empty PBC whose bitmaps describe at least `pages` pages.
    ///
    /// The bitmaps grow as pages past the end are marked.
    pub fn new(pages: u32) -> Self {
        Self {
            erase: vec![false; pages as usize],
            pages: BTreeMap::new(),
        }
    }

    fn mark_erase(&mut self, page: u32) {
        let page = page as usize;
        if page >= self.erase.len() {
            self.erase.resize(page + 1, false);
        }
        self.erase[page] = true;
    }

    /// Marks every page overlapping `region` for erasure.
    pub fn erase(mut self, region: Region) -> Self {
        let first = region.ptr.address / PAGE_SIZE;
        let last = (region.ptr.address + region.len + PAGE_SIZE - 1) / PAGE_SIZE;
        for page in first..last {
            self.mark_erase(page);
        }
        self
    }

    /// Replaces the pages starting at `addr`, which must be page-aligned,
    /// with `data`.
    ///
    /// The pages are also marked for erasure; the last page is padded with
    /// the erase pattern.
    pub fn replace(mut self, addr: u32, data: &[u8]) -> Self {
        let first = addr / PAGE_SIZE;
        for (i, chunk) in data.chunks(PAGE_SIZE as usize).enumerate() {
            let page = first + i as u32;
            let mut bytes = chunk.to_vec();
            bytes.resize(PAGE_SIZE as usize, PATTERN as u8);
            self.mark_erase(page);
            self.pages.insert(page, bytes);
        }
        self
    }

    /// Encodes this PBC.
    pub fn to_bytes(&self) -> Vec<u8> {
        let last = self.pages.keys().next_back().map_or(0, |&p| p as usize + 1);
        let nbit = (self.erase.len().max(last) + 7) / 8 * 8;

        let payload = self.pages.values().flatten().copied().collect::<Vec<_>>();
        let header = Header {
            tag: TAG,
            version: VERSION,
            page_size: PAGE_SIZE,
            pattern_size: PATTERN_SIZE,
            pattern: PATTERN,
            bitmap_nbit: nbit as u32,
            payload_len: payload.len() as u32,
            ..Default::default()
        };

        let mut out = header.as_bytes().to_vec();
        out.extend(bitmap(nbit, |p| self.erase.get(p) == Some(&true)));
        out.extend(bitmap(nbit, |p| self.pages.contains_key(&(p as u32))));
        out.extend(payload);
        out
    }
}

/// Encodes `nbit` bits of a page bitmap, most significant bit first.
fn bitmap(nbit: usize, marked: impl Fn(usize) -> bool) -> Vec<u8> {
    (0..nbit / 8)
        .map(|byte| {
            (0..8)
                .filter(|bit| marked(byte * 8 + bit))
                .fold(0u8, |acc, bit| acc | 0x80 >> bit)
        })
        .collect()
}

/// The protected content of an update capsule.
///
/// Sign the output of [`Capsule::to_bytes()`] with the device's capsule
/// type to obtain a capsule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capsule {
    /// The signed PFM.
    pub pfm: Vec<u8>,
    /// The signed FVMs, with their offsets from the start of the signed
    /// PFM; that is, from the active PFM address. Offsets must increase.
    pub fvms: Vec<(u32, Vec<u8>)>,
    /// The encoded PBC.
    pub pbc: Vec<u8>,
}

impl Capsule {
    /// Encodes this capsule's content.
    ///
    /// Gaps between the manifests are filled with the erase pattern. Fails
    /// if an FVM would overlap what precedes it.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut out = self.pfm.clone();
        for (offset, fvm) in &self.fvms {
            check!(*offset as usize >= out.len(), Error::OutOfBounds);
            out.resize(*offset as usize, PATTERN as u8);
            out.extend_from_slice(fvm);
        }
        out.extend_from_slice(&self.pbc);
        Ok(out)
    }
}
