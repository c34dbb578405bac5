// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Magic numbers and discriminants as they appear in flash.
//!
//! Signatures, manifests and capsules are all tagged with magic words and
//! small type bytes. [`WireEnum`] gives each such set of values a Rust enum,
//! so that an unknown magic surfaces as `None` where it is read instead of
//! travelling on as a raw integer.

use core::fmt;

/// A closed set of values that has a fixed encoding in flash.
///
/// Every variant encodes to a wire value; most wire values decode to
/// nothing. The variant name doubles as a textual form, which the host
/// tool uses on its command line.
///
/// Decoding what was encoded gives back the same variant:
/// ```
/// # use pfr::keychain::block::Magic;
/// # use pfr::wire::WireEnum;
/// let magic = Magic::Block1;
/// assert_eq!(Magic::from_wire_value(magic.to_wire_value()), Some(magic));
/// assert_eq!(Magic::from_wire_value(0), None);
/// ```
pub trait WireEnum: Sized + Copy {
    /// The integer this enum is stored as.
    type Wire;

    /// Returns the value stored in flash for `self`.
    fn to_wire_value(self) -> Self::Wire;

    /// Decodes a value read from flash, if it names a variant.
    fn from_wire_value(wire: Self::Wire) -> Option<Self>;

    /// Returns the variant's name.
    fn name(self) -> &'static str;

    /// Looks a variant up by name.
    fn from_name(name: &str) -> Option<Self>;
}

/// Returned when parsing a [`WireEnum`] from a name it does not have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UnknownName;

impl fmt::Display for UnknownName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("no variant has that name")
    }
}

/// Declares an enum of wire values and implements [`WireEnum`] for it.
///
/// ```text
/// wire_enum! {
///     /// The type byte that opens a definition.
///     pub enum DefType: u8 {
///         /// A SPI region.
///         SpiRegion = 1,
///         /// An SMBus rule.
///         SmbusRule = 2,
///     }
/// }
/// ```
/// Besides `WireEnum`, the enum gets `Display` and `FromStr` through its
/// variant names, and serde support when the `serde` feature is on.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident : $wire:ident {
        $($(#[$meta_variant:meta])* $variant:ident = $value:tt,)*
    }) => {
        $(#[$meta])*
        #[repr($wire)]
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis enum $name {
            $($(#[$meta_variant])* $variant = $value,)*
        }

        impl $crate::wire::WireEnum for $name {
            type Wire = $wire;

            fn to_wire_value(self) -> $wire {
                self as $wire
            }

            fn from_wire_value(wire: $wire) -> Option<Self> {
                match wire {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)*
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($variant) => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                f.write_str($crate::wire::WireEnum::name(*self))
            }
        }

        impl core::str::FromStr for $name {
            type Err = $crate::wire::UnknownName;

            fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
                <Self as $crate::wire::WireEnum>::from_name(s)
                    .ok_or($crate::wire::UnknownName)
            }
        }
    }
}
