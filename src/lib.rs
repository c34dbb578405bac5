// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! `pfr` is the trust-decision core of a platform firmware resilience (PFR)
//! root of trust.
//!
//! A PFR controller sits between two independently-updatable firmware
//! subsystems, a baseboard-management controller (BMC) and a platform
//! controller hub (PCH), and the SPI flash devices that hold their images.
//! Before either subsystem is released from reset, the controller decides
//! whether the *active*, *recovery*, and *staging* copies of each image are
//! authentic, and repairs them from a trusted copy if they are not.
//!
//! The crate is organized leaves-first:
//! - [`pbc`] reconstructs flash regions from a two-bitmap compressed update
//!   payload.
//! - [`keychain`] authenticates "Block0 + Block1" signed payloads, and owns
//!   the persistent key-cancellation policy.
//! - [`manifest`] walks an authenticated platform firmware manifest (PFM),
//!   applying its write-protection and SMBus filtering policy.
//! - [`recovery`] sequences authentication, retry, and repair across the
//!   three copies of an image.
//!
//! Everything that touches real hardware (flash, the device mux, watchdogs,
//! filters, non-volatile storage) and all cryptographic primitives are
//! abstracted behind traits in [`hardware`] and [`crypto`]. Software
//! implementations of the latter, based on `ring`, are available behind the
//! `ring` feature.
//!
//! With the `std` feature, each of the format modules also provides an
//! `owned` submodule for *building* the binary structures this crate parses;
//! these are intended for host tooling and tests.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![deny(warnings)]
#![deny(unused)]
#![deny(unsafe_code)]

#[macro_use]
mod debug;
pub use debug::Error;

#[cfg(feature = "serde")]
mod serde;

#[macro_use]
pub mod wire;

pub mod crypto;
pub mod hardware;
pub mod io;
pub mod keychain;
pub mod manifest;
pub mod pbc;
pub mod provision;
pub mod recovery;

/// A [`Result`](core::result::Result) whose error is a wrapped
/// [`pfr::Error`](Error).
pub type Result<T, E> = core::result::Result<T, Error<E>>;
