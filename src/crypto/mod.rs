// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable cryptograpy traits.
//!
//! `pfr` requires SHA-2 hashing and ECDSA verification to authenticate
//! anything. This module provides object-safe traits that abstract over
//! those operations; the primitives themselves are never implemented here.
//!
//! Users are expected to provide their own implementations of these traits,
//! which will usually front a hardware accelerator.
//!
//! It is recommended to not import the traits in this module directly, since
//! a lot of them have the same name. Instead, use imports like
//! `use pfr::crypto::hash;` and partially-qualified names like
//! `hash::Engine`.
//!
//! Software implementations of these traits are provided under the
//! [`ring` module], based on the [`ring`] crate. Their presence is controlled
//! by the `ring` feature flag; signing requires `std` as well.
//!
//! [`ring` module]: ring/index.html

pub mod ecdsa;
pub mod hash;

#[cfg(feature = "ring")]
pub mod ring;
