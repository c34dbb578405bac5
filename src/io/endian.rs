// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Traits for decoding integers from byte representations.
//!
//! Every integer in the flash formats handled by this crate is little-endian;
//! integrations should never have to interact with this module directly.

use core::mem;

use byteorder::ByteOrder as _;
use byteorder::LE;

use crate::io;
use crate::io::Read;
use crate::Result;

/// A little-endian integer that can be read out of a flash structure.
pub trait LeInt: Sized + Copy {
    /// Reads a value of type `Self`, in little-endian order.
    fn read_from<R: Read>(r: R) -> Result<Self, io::Error>;
}

impl LeInt for u8 {
    #[inline]
    fn read_from<R: Read>(mut r: R) -> Result<Self, io::Error> {
        let mut bytes = [0; mem::size_of::<Self>()];
        r.read_bytes(&mut bytes)?;
        Ok(bytes[0])
    }
}

macro_rules! le_int {
    ($($ty:ty: $read:ident;)*) => {$(
        impl LeInt for $ty {
            #[inline]
            fn read_from<R: Read>(mut r: R) -> Result<Self, io::Error> {
                let mut bytes = [0; mem::size_of::<Self>()];
                r.read_bytes(&mut bytes)?;
                Ok(LE::$read(&bytes))
            }
        }
    )*};
}

le_int! {
    u16: read_u16;
    u32: read_u32;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn magic_is_little_endian() {
        let buf = [0x19, 0xfd, 0xea, 0xb6, 0x34, 0x12];
        let mut r = &buf[..];
        assert_eq!(u32::read_from(&mut r).unwrap(), 0xB6EAFD19);
        assert_eq!(u16::read_from(&mut r).unwrap(), 0x1234);
        assert!(u8::read_from(&mut r).is_err());
    }
}
