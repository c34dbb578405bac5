// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Word-addressed non-volatile memory.
//!
//! Persistent policy (key cancellation, per-device trust state, and
//! anti-rollback floors) lives in a small on-chip NVM, addressed in 32-bit
//! words. An erased word reads as all ones.

/// An [`Nvm`] error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that a word index was outside the device.
    OutOfRange,

    /// Indicates that an unspecified error occured.
    Unspecified,
}

/// Provides access to persistent, word-addressed storage.
///
/// Writes must be durable by the time `write_word()` returns `Ok`.
pub trait Nvm {
    /// Reads the word at `index`.
    fn read_word(&self, index: u32) -> Result<u32, Error>;

    /// Overwrites the word at `index` with `value`.
    fn write_word(&mut self, index: u32, value: u32) -> Result<(), Error>;
}
impl dyn Nvm {} // Ensure object-safe.

impl<N: Nvm + ?Sized> Nvm for &mut N {
    #[inline]
    fn read_word(&self, index: u32) -> Result<u32, Error> {
        N::read_word(self, index)
    }

    #[inline]
    fn write_word(&mut self, index: u32, value: u32) -> Result<(), Error> {
        N::write_word(self, index, value)
    }
}

/// Persistent storage for a monotonic security version number.
///
/// The floor is kept as a 64-bit thermometer code across two words: an SVN
/// of `n` is stored by clearing the low `n` bits, so raising it only ever
/// clears bits and an erased pair reads as zero.
pub struct SvnFloor {
    base: u32,
}

/// The largest representable SVN.
pub const MAX_SVN: u32 = 64;

impl SvnFloor {
    /// Creates a new `SvnFloor` stored in the two words at `base`.
    pub const fn new(base: u32) -> Self {
        Self { base }
    }

    /// Reads the current floor.
    pub fn get(&self, nvm: &impl Nvm) -> Result<u32, Error> {
        let lo = nvm.read_word(self.base)?;
        let hi = nvm.read_word(self.base + 1)?;
        let bits = (hi as u64) << 32 | lo as u64;
        Ok(bits.trailing_zeros())
    }

    /// Returns whether `svn` is at or above the current floor.
    pub fn allows(&self, nvm: &impl Nvm, svn: u32) -> Result<bool, Error> {
        Ok(svn <= MAX_SVN && svn >= self.get(nvm)?)
    }

    /// Raises the floor to `svn`.
    ///
    /// Does nothing if `svn` is not above the current floor; in particular,
    /// NVM is not written when the value would not change.
    pub fn raise(&self, nvm: &mut impl Nvm, svn: u32) -> Result<(), Error> {
        if svn > MAX_SVN || svn <= self.get(nvm)? {
            return Ok(());
        }
        let bits = if svn == MAX_SVN { 0 } else { !0u64 << svn };
        nvm.write_word(self.base, bits as u32)?;
        nvm.write_word(self.base + 1, (bits >> 32) as u32)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::fake;

    #[test]
    fn svn_is_monotonic() {
        let mut nvm = fake::Nvm::new(4);
        let svn = SvnFloor::new(2);
        assert_eq!(svn.get(&nvm).unwrap(), 0);

        svn.raise(&mut nvm, 5).unwrap();
        assert_eq!(svn.get(&nvm).unwrap(), 5);
        assert_eq!(nvm.words[2], !0b11111);
        assert!(!svn.allows(&nvm, 4).unwrap());
        assert!(svn.allows(&nvm, 5).unwrap());

        svn.raise(&mut nvm, 3).unwrap();
        assert_eq!(svn.get(&nvm).unwrap(), 5);

        svn.raise(&mut nvm, 40).unwrap();
        assert_eq!(nvm.words[2], 0);
        assert_eq!(svn.get(&nvm).unwrap(), 40);

        svn.raise(&mut nvm, MAX_SVN).unwrap();
        assert_eq!(svn.get(&nvm).unwrap(), MAX_SVN);
        assert!(!svn.allows(&nvm, MAX_SVN + 1).unwrap());
    }
}
