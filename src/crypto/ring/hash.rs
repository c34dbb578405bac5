// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Implementations of [`crypto::hash`] based on `ring`.

use ring::digest;

use crate::crypto::hash;

#[cfg(doc)]
use crate::crypto;

/// A `ring`-based [`hash::Engine`].
pub struct Engine {
    inner: Option<digest::Context>,
}

impl Engine {
    /// Creates a new `Engine`.
    pub fn new() -> Self {
        Self { inner: None }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl hash::Engine for Engine {
    fn supports(&mut self, _: hash::Algo) -> bool {
        true
    }

    fn start_raw(&mut self, algo: hash::Algo) -> Result<(), hash::Error> {
        self.inner = Some(digest::Context::new(match algo {
            hash::Algo::Sha256 => &digest::SHA256,
            hash::Algo::Sha384 => &digest::SHA384,
        }));
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), hash::Error> {
        match &mut self.inner {
            Some(c) => c.update(data),
            None => return Err(hash::Error::Idle),
        }
        Ok(())
    }

    fn finish_raw(&mut self, out: &mut [u8]) -> Result<(), hash::Error> {
        let c = self.inner.take().ok_or(hash::Error::Idle)?;
        if out.len() != c.algorithm().output_len {
            return Err(hash::Error::WrongSize);
        }
        out.copy_from_slice(c.finish().as_ref());
        Ok(())
    }
}
