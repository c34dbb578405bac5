// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! External, remote flash abstraction.
//!
//! This module provides the [`Flash`] trait, which represents the single
//! flash address space the controller sees. The device behind that address
//! space is switched with a [`Mux`](super::Mux); everything in this crate
//! reads flash exclusively through this trait, so every access is bounds
//! checked by the implementation rather than computed as a raw pointer.
//!
//! Every byte read through a [`Flash`] is untrusted until a signature over it
//! has been checked.

use core::convert::TryInto;

use zerocopy::AsBytes;
use zerocopy::FromBytes;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::io;

/// A [`Flash`] error.
///
/// All of these errors are non-retryable; a [`Flash`] implementation should
/// block until the operation succeeds or definitively fails.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Indicates that an operation failed because the requested
    /// operation was outside of the device's address space.
    OutOfRange,

    /// Indicates that an erase was requested at an address that is not
    /// aligned to the erase granularity.
    Unaligned,

    /// Indicates that the device is locked in some manner and cannot
    /// be affected by the operation.
    Locked,

    /// Indicates that the device's write-in-progress status did not clear
    /// within the polling budget after a program or erase.
    Timeout,

    /// Indicates that an unspecified error occured.
    Unspecified,
}

/// Erase granularities supported by a [`Flash`] device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EraseBlock {
    /// A 4 KiB sector erase.
    Sector4K,
    /// A 64 KiB block erase.
    Block64K,
}

impl EraseBlock {
    /// Returns the number of bytes this erase clears.
    pub const fn len(self) -> u32 {
        match self {
            Self::Sector4K => 0x1000,
            Self::Block64K => 0x10000,
        }
    }
}

/// Provides access to a flash-like storage device.
///
/// This trait provides abstract operations on a device, as if it were a
/// block of random-access memory. It is the implementation's responsibility
/// to implement these operations efficiently with respect to the underlying
/// device, including polling its write-in-progress status: a `program()` or
/// `erase()` that returns `Ok` must have completed.
pub trait Flash {
    /// Returns the size, in bytes, of this device.
    fn size(&self) -> Result<u32, Error>;

    /// Attempts to read `out.len()` bytes starting at `offset`.
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error>;

    /// Attempts to write `buf.len()` bytes starting at `offset`.
    ///
    /// The bytes must have been erased beforehand; as with real NOR flash,
    /// programming can only clear bits.
    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error>;

    /// Erases the `block` starting at `offset`, setting every byte to `0xff`.
    ///
    /// `offset` must be aligned to `block.len()`.
    fn erase(&mut self, offset: Ptr, block: EraseBlock) -> Result<(), Error>;

    /// Flushes any pending `program()` operations.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
impl dyn Flash {} // Ensure object-safe.

impl<F: Flash + ?Sized> Flash for &F {
    #[inline]
    fn size(&self) -> Result<u32, Error> {
        F::size(self)
    }

    #[inline]
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        F::read(self, offset, out)
    }

    #[inline]
    fn program(&mut self, _: Ptr, _: &[u8]) -> Result<(), Error> {
        Err(Error::Locked)
    }

    #[inline]
    fn erase(&mut self, _: Ptr, _: EraseBlock) -> Result<(), Error> {
        Err(Error::Locked)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        Err(Error::Locked)
    }
}

impl<F: Flash + ?Sized> Flash for &mut F {
    #[inline]
    fn size(&self) -> Result<u32, Error> {
        F::size(self)
    }

    #[inline]
    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        F::read(self, offset, out)
    }

    #[inline]
    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error> {
        F::program(self, offset, buf)
    }

    #[inline]
    fn erase(&mut self, offset: Ptr, block: EraseBlock) -> Result<(), Error> {
        F::erase(self, offset, block)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        F::flush(self)
    }
}

/// Convenience functions for structured flash reads.
#[extend::ext(name = FlashExt)]
pub impl<F: Flash + ?Sized> F {
    /// Reads a fixed-layout value of type `T` at `offset`.
    fn read_object<T: AsBytes + FromBytes>(
        &self,
        offset: Ptr,
    ) -> Result<T, Error> {
        let mut val = T::new_zeroed();
        self.read(offset, val.as_bytes_mut())?;
        Ok(val)
    }

    /// Reads a little-endian `u32` at `offset`.
    fn read_u32(&self, offset: Ptr) -> Result<u32, Error> {
        let mut bytes = [0; 4];
        self.read(offset, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Erases every 4 KiB sector that overlaps `region`.
    ///
    /// 64 KiB block erases are used wherever a whole, aligned block lies
    /// inside the erased span.
    fn erase_region(&mut self, region: Region) -> Result<(), Error> {
        let sector = EraseBlock::Sector4K.len();
        let block = EraseBlock::Block64K.len();
        let end = region
            .end()
            .and_then(|end| end.checked_add(sector - 1))
            .ok_or(Error::OutOfRange)?
            / sector
            * sector;

        let mut addr = region.ptr.address / sector * sector;
        while addr < end {
            let erase = if end - addr >= block && addr % block == 0 {
                EraseBlock::Block64K
            } else {
                EraseBlock::Sector4K
            };
            self.erase(Ptr::new(addr), erase)?;
            addr += erase.len();
        }
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dest`, which must already be
    /// erased.
    ///
    /// The bytes are moved through a small stack buffer; overlapping spans
    /// are not supported.
    fn copy_within(
        &mut self,
        src: Ptr,
        dest: Ptr,
        len: u32,
    ) -> Result<(), Error> {
        const CHUNK: u32 = 256;
        let mut buf = [0; CHUNK as usize];
        let src_end = src.address.checked_add(len);
        let dest_end = dest.address.checked_add(len);
        if src_end.is_none() || dest_end.is_none() {
            return Err(Error::OutOfRange);
        }

        let mut offset = 0;
        while offset < len {
            let n = CHUNK.min(len - offset);
            let chunk = &mut buf[..n as usize];
            self.read(Ptr::new(src.address + offset), chunk)?;
            self.program(Ptr::new(dest.address + offset), chunk)?;
            offset += n;
        }
        Ok(())
    }
}

/// Adapter for converting RAM-backed storage into a [`Flash`].
///
/// For the purposes of this type, "RAM-backed" means that `AsRef<[u8]>`
/// is implemented. The resulting device is read-only.
#[derive(Copy, Clone)]
pub struct Ram<Bytes>(pub Bytes);

fn ram_slice(bytes: &[u8], offset: Ptr, len: usize) -> Result<(usize, usize), Error> {
    let start = offset.address as usize;
    let end = start.checked_add(len).ok_or(Error::OutOfRange)?;
    if end > bytes.len() {
        return Err(Error::OutOfRange);
    }
    Ok((start, end))
}

impl<Bytes: AsRef<[u8]>> Flash for Ram<Bytes> {
    fn size(&self) -> Result<u32, Error> {
        self.0
            .as_ref()
            .len()
            .try_into()
            .map_err(|_| Error::Unspecified)
    }

    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        let (start, end) = ram_slice(self.0.as_ref(), offset, out.len())?;
        out.copy_from_slice(&self.0.as_ref()[start..end]);
        Ok(())
    }

    fn program(&mut self, _: Ptr, _: &[u8]) -> Result<(), Error> {
        Err(Error::Locked)
    }

    fn erase(&mut self, _: Ptr, _: EraseBlock) -> Result<(), Error> {
        Err(Error::Locked)
    }
}

/// Adapter for converting mutable, RAM-backed storage into a [`Flash`].
///
/// For the purposes of this type, "RAM-backed" means that `AsRef<[u8]>`
/// and `AsMut<[u8]>` are implemented.
///
/// Programming behaves like NOR flash: it can only clear bits, so a region
/// must be erased before it can be rewritten.
#[derive(Copy, Clone)]
pub struct RamMut<Bytes>(pub Bytes);

impl<Bytes: AsRef<[u8]> + AsMut<[u8]>> Flash for RamMut<Bytes> {
    fn size(&self) -> Result<u32, Error> {
        self.0
            .as_ref()
            .len()
            .try_into()
            .map_err(|_| Error::Unspecified)
    }

    fn read(&self, offset: Ptr, out: &mut [u8]) -> Result<(), Error> {
        let (start, end) = ram_slice(self.0.as_ref(), offset, out.len())?;
        out.copy_from_slice(&self.0.as_ref()[start..end]);
        Ok(())
    }

    fn program(&mut self, offset: Ptr, buf: &[u8]) -> Result<(), Error> {
        let (start, end) = ram_slice(self.0.as_ref(), offset, buf.len())?;
        for (dst, src) in self.0.as_mut()[start..end].iter_mut().zip(buf) {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase(&mut self, offset: Ptr, block: EraseBlock) -> Result<(), Error> {
        if offset.address % block.len() != 0 {
            return Err(Error::Unaligned);
        }
        let (start, end) =
            ram_slice(self.0.as_ref(), offset, block.len() as usize)?;
        for byte in &mut self.0.as_mut()[start..end] {
            *byte = 0xff;
        }
        Ok(())
    }
}

/// A [`Read`] implementation for walking a window of a [`Flash`] serially.
///
/// The window bounds every read: a record that claims to extend past the
/// end of the window fails with [`io::Error::BufferExhausted`], rather than
/// reading whatever follows it in flash.
///
/// [`Read`]: crate::io::Read
pub struct FlashIo<'f, F: ?Sized> {
    flash: &'f F,
    cursor: u32,
    end: u32,
}

impl<'f, F: Flash + ?Sized> FlashIo<'f, F> {
    /// Creates a new `FlashIo` over `region` of `flash`.
    pub fn new(flash: &'f F, region: Region) -> Self {
        Self {
            flash,
            cursor: region.ptr.address,
            end: region.ptr.address.saturating_add(region.len),
        }
    }

    /// Returns the absolute flash address of the cursor.
    pub fn position(&self) -> u32 {
        self.cursor
    }

    /// Skips the cursor `bytes` bytes forward.
    pub fn skip(&mut self, bytes: u32) -> crate::Result<(), io::Error> {
        check!(
            bytes as usize <= io::Read::remaining_data(self),
            io::Error::BufferExhausted
        );
        self.cursor += bytes;
        Ok(())
    }
}

impl<F: Flash + ?Sized> io::Read for FlashIo<'_, F> {
    fn read_bytes(&mut self, out: &mut [u8]) -> crate::Result<(), io::Error> {
        check!(
            out.len() <= io::Read::remaining_data(self),
            io::Error::BufferExhausted
        );
        if self.flash.read(Ptr::new(self.cursor), out).is_err() {
            return fail!(io::Error::Internal);
        }
        self.cursor += out.len() as u32;
        Ok(())
    }

    fn remaining_data(&self) -> usize {
        self.end.saturating_sub(self.cursor) as usize
    }
}

/// An abstract pointer into a [`Flash`] type.
///
/// A `Ptr` needs to be used in conjunction with a [`Flash`]
/// implementation to be read from or written to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsBytes, FromBytes)]
#[repr(transparent)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ptr {
    /// The abstract address of this pointer.
    pub address: u32,
}

impl Ptr {
    /// Convenience method for creating a `Ptr` without having to use
    /// a struct literal.
    pub const fn new(address: u32) -> Self {
        Self { address }
    }
}

/// A region within  a [`Flash`] type.
///
/// Much like a [`Ptr`], a `Region` needs to be interpreted with
/// respect to a [`Flash`] implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, AsBytes, FromBytes)]
#[repr(C)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Region {
    /// The base pointer for this slice.
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub ptr: Ptr,
    /// The length of the slice, in bytes.
    pub len: u32,
}

impl Region {
    /// Convenience method for creating a `Region` without having to use
    /// a struct literal.
    pub const fn new(ptr: u32, len: u32) -> Self {
        Self {
            ptr: Ptr::new(ptr),
            len,
        }
    }

    /// Creates a `Region` spanning `[start, end)`.
    ///
    /// Returns `None` if `end < start`.
    pub fn from_bounds(start: u32, end: u32) -> Option<Self> {
        Some(Self::new(start, end.checked_sub(start)?))
    }

    /// Returns the first address past the end of this region, if it does
    /// not overflow.
    pub fn end(self) -> Option<u32> {
        self.ptr.address.checked_add(self.len)
    }
}
