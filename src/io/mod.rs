// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! I/O interfaces, in lieu of [`std::io`].
//!
//! These traits are used for walking variable-length flash structures, such
//! as manifest definitions, one field at a time.

pub mod bitmap;
pub mod endian;
pub mod read;

pub use bitmap::PageBits;
pub use read::Read;

/// A generic, low-level I/O error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates that some underlying buffer has been completely used up,
    /// either for reading from or writing to.
    ///
    /// When walking a flash structure, this means that a record claimed to
    /// extend past the end of its container.
    BufferExhausted,

    /// Indicates that an unspecified, internal failure occurred, such as a
    /// failed read from an underlying device.
    Internal,
}
