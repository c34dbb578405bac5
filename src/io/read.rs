// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Field-at-a-time reads out of a bounded container.

use static_assertions::assert_obj_safe;

use crate::io;
use crate::io::endian::LeInt;
use crate::Result;

/// A bounded source of bytes, such as a manifest body in flash.
///
/// Unlike [`std::io::Read`], a `Read` knows how much it has left. The bound
/// is the declared length of the enclosing structure, so a definition that
/// claims to run past the end of its manifest fails with
/// [`io::Error::BufferExhausted`] instead of reading its neighbour.
pub trait Read {
    /// Fills `out` completely, or fails without consuming anything.
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), io::Error>;

    /// Returns how many bytes remain before the bound.
    fn remaining_data(&self) -> usize;

    /// Reads one little-endian field.
    ///
    /// Implementors should leave this alone; it is only sugar over
    /// [`Read::read_bytes()`].
    #[inline]
    fn read_le<I: LeInt>(&mut self) -> Result<I, io::Error>
    where
        Self: Sized,
    {
        I::read_from(self)
    }
}
assert_obj_safe!(Read);

impl<R: Read + ?Sized> Read for &'_ mut R {
    #[inline]
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), io::Error> {
        (**self).read_bytes(out)
    }

    #[inline]
    fn remaining_data(&self) -> usize {
        (**self).remaining_data()
    }
}

impl Read for &[u8] {
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), io::Error> {
        check!(out.len() <= self.len(), io::Error::BufferExhausted);
        let (head, tail) = self.split_at(out.len());
        out.copy_from_slice(head);
        *self = tail;
        Ok(())
    }

    fn remaining_data(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn definition_fields() {
        // A SPI region header: type, protection, hash mask, start, end.
        let mut def: &[u8] = &[
            0x01, 0x05, 0x01, 0x00, //
            0x00, 0x00, 0x02, 0x00, //
            0x00, 0x20, 0x02, 0x00, //
        ];
        assert_eq!(def.read_le::<u8>().unwrap(), 1);
        assert_eq!(def.read_le::<u8>().unwrap(), 0x05);
        assert_eq!(def.read_le::<u16>().unwrap(), 0x0001);
        assert_eq!(def.read_le::<u32>().unwrap(), 0x2_0000);
        assert_eq!(def.remaining_data(), 4);

        let mut end = [0; 4];
        def.read_bytes(&mut end).unwrap();
        assert_eq!(u32::from_le_bytes(end), 0x2_2000);
        assert_eq!(def.remaining_data(), 0);
    }

    #[test]
    fn overrun_consumes_nothing() {
        let mut def: &[u8] = &[0xaa, 0xbb, 0xcc];
        assert_eq!(
            def.read_le::<u32>().unwrap_err().into_inner(),
            io::Error::BufferExhausted
        );
        assert_eq!(def.remaining_data(), 3);
        assert_eq!(def.read_le::<u16>().unwrap(), 0xbbaa);
    }
}
