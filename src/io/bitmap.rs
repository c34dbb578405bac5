// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Cursors over page bitmaps.
//!
//! A PBC bitmap marks one flash page per bit. Within each byte the first
//! page is the most significant bit, so `0b1000_0000` marks only the first
//! of its eight pages.

use crate::io;
use crate::Result;

/// The unread pages of one bitmap byte.
#[derive(Copy, Clone, Debug, Default)]
pub struct PageBits {
    // Unread bits are kept at the top of `bits`; everything below `len`
    // of them is zero.
    bits: u8,
    len: u8,
}

impl PageBits {
    /// Creates a cursor with no pages left in it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cursor at the first page of `byte`.
    pub fn from_byte(byte: u8) -> Self {
        Self { bits: byte, len: 8 }
    }

    /// Returns how many pages of the byte are left.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns whether every page of the byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Steps over `n` pages.
    pub fn skip(&mut self, n: usize) -> Result<(), io::Error> {
        check!(n <= self.len(), io::Error::BufferExhausted);
        self.bits = ((self.bits as u16) << n) as u8;
        self.len -= n as u8;
        Ok(())
    }

    /// Returns whether the next page is marked, and steps past it.
    pub fn next_page(&mut self) -> Result<bool, io::Error> {
        check!(!self.is_empty(), io::Error::BufferExhausted);
        let marked = self.bits & 0x80 != 0;
        self.skip(1)?;
        Ok(marked)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_page_is_msb() {
        // Pages 0 and 6 of this byte are marked.
        let mut bits = PageBits::from_byte(0b1000_0010);
        let pages = (0..8)
            .map(|_| bits.next_page().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            pages,
            vec![true, false, false, false, false, false, true, false]
        );
        assert!(bits.is_empty());
        assert_eq!(
            bits.next_page().unwrap_err().into_inner(),
            io::Error::BufferExhausted
        );
    }

    #[test]
    fn skip_to_page() {
        let mut bits = PageBits::from_byte(0b0001_0001);
        bits.skip(3).unwrap();
        assert_eq!(bits.len(), 5);
        assert!(bits.next_page().unwrap());
        assert!(!bits.next_page().unwrap());

        assert!(bits.skip(4).is_err());
        bits.skip(2).unwrap();
        assert!(bits.next_page().unwrap());
        assert!(bits.is_empty());

        let mut whole = PageBits::from_byte(0xff);
        whole.skip(8).unwrap();
        assert!(whole.is_empty());
        assert!(PageBits::new().is_empty());
    }
}
