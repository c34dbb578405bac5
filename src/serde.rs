// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Internal `serde` helpers.
//!
//! Provisioning files are written by hand, so flash offsets are accepted
//! in hex and digests are spelled as hex strings.

use core::fmt;
use core::fmt::LowerHex;
use core::fmt::Write as _;
use core::marker::PhantomData;

use serde::de;
use serde::Deserializer;
use serde::Serializer;

/// No-std helper for using as a `write!()` target.
struct ArrayBuf<const N: usize>([u8; N], usize);

impl<const N: usize> ArrayBuf<N> {
    fn as_str(&self) -> &str {
        // Only ever written to through `write_str()`.
        core::str::from_utf8(&self.0[..self.1]).unwrap_or("")
    }
}

impl<const N: usize> Default for ArrayBuf<N> {
    fn default() -> Self {
        Self([0; N], 0)
    }
}

impl<const N: usize> fmt::Write for ArrayBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let space_left = N - self.1;
        if space_left < bytes.len() {
            return Err(fmt::Error);
        }

        self.0[self.1..self.1 + bytes.len()].copy_from_slice(bytes);
        self.1 += bytes.len();
        Ok(())
    }
}

struct ExpectedByDisplay<T>(T);
impl<T: fmt::Display> de::Expected for ExpectedByDisplay<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Helper for `de_radix`.
pub struct Radix<T>(PhantomData<T>);

macro_rules! impl_radix {
    ($($ty:ident)*) => {$(
        impl<'de> de::Visitor<'de> for Radix<$ty> {
            type Value = $ty;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "integer between 0 and {}", $ty::MAX)
            }

            fn visit_str<E>(self, s: &str) -> Result<$ty, E>
                where E: de::Error,
            {
                let int = if let Some(hex) =
                    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
                {
                    $ty::from_str_radix(hex, 16)
                } else {
                    s.parse::<$ty>()
                };

                int.map_err(E::custom)
            }

            fn visit_u64<E>(self, n: u64) -> Result<$ty, E>
                where E: de::Error,
            {
                if n <= $ty::MAX as u64 {
                    Ok(n as $ty)
                } else {
                    let msg = concat!("integer between 0 and ", stringify!($ty), "::MAX");
                    Err(E::invalid_value(de::Unexpected::Unsigned(n), &msg))
                }
            }
        }
    )*}
}
impl_radix! {
    u8 u32
}

/// Deserializes an integer from either a string (which supports hex encoding)
/// or a normal integer.
///
/// Unfortunately, the way this is implemented breaks non-self-describing
/// formats, but Serde support isn't really intended for that anways.
pub fn de_radix<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    Radix<T>: de::Visitor<'de, Value = T>,
{
    d.deserialize_any(Radix::<T>(PhantomData))
}

/// Serializes an integer as hex.
pub fn se_hex<S, X>(x: &X, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    X: LowerHex,
{
    let mut buf = ArrayBuf::<18>::default();
    let _ = write!(buf, "0x{:x}", x);
    s.serialize_str(buf.as_str())
}

/// Helper for `de_hex_array`.
pub struct HexArray<const N: usize>;

impl<'de, const N: usize> de::Visitor<'de> for HexArray<N> {
    type Value = [u8; N];

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a hex string of {} bytes", N)
    }

    fn visit_str<E>(self, s: &str) -> Result<[u8; N], E>
    where
        E: de::Error,
    {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if !s.is_ascii() || s.len() != 2 * N {
            return Err(E::invalid_length(s.len() / 2, &ExpectedByDisplay(N)));
        }

        let mut out = [0; N];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(E::custom)?;
        }
        Ok(out)
    }
}

/// Deserializes a `[u8; N]` from a hex string, for digests longer than
/// `serde`'s built-in array support.
pub fn de_hex_array<'de, D, const N: usize>(d: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_str(HexArray::<N>)
}

/// Serializes a byte array as a hex string.
pub fn se_hex_array<S, const N: usize>(
    bytes: &[u8; N],
    s: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut buf = ArrayBuf::<130>::default();
    for byte in bytes {
        if write!(buf, "{:02x}", byte).is_err() {
            return Err(<S::Error as serde::ser::Error>::custom(
                "byte array too long",
            ));
        }
    }
    s.serialize_str(buf.as_str())
}
