// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable hardware functionality
//!
//! This module provides traits for plugging in the hardware the trust core
//! drives: the flash mux, the watchdog, the SPI write-protection and SMBus
//! command filters, and the non-volatile storage backing persistent policy.
//! `pfr` never touches registers itself; integrations implement these traits
//! for their platform.
//!
//! All of these traits are object-safe, and the long-running operations in
//! this crate take the simpler ones (such as [`Watchdog`]) as trait objects.

use crate::hardware::flash::Region;

pub mod flash;
pub mod nvm;

wire_enum! {
    /// One of the two SPI flash devices behind the controller's mux.
    pub enum Device: u8 {
        /// The baseboard management controller's flash.
        Bmc = 0x00,
        /// The platform controller hub's flash.
        Pch = 0x01,
    }
}

/// Selects which physical flash device backs the
/// [`Flash`](flash::Flash) address space.
///
/// Multi-step operations on a device must select it first, and must not
/// interleave accesses to the other device without re-selecting.
pub trait Mux {
    /// Routes the flash address space to `device`.
    fn select(&mut self, device: Device);
}
impl dyn Mux {} // Ensure object-safe.

/// A watchdog that must be serviced periodically during long operations.
///
/// Failing to call [`Watchdog::kick()`] often enough is fatal to the
/// platform, so erase and copy loops call it at a fixed cadence.
pub trait Watchdog {
    /// Services the watchdog.
    fn kick(&mut self);
}
impl dyn Watchdog {} // Ensure object-safe.

/// A watchdog that does nothing, for contexts with no deadline.
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn kick(&mut self) {}
}

/// The bus filters configured from an authenticated manifest.
///
/// Both operations are one-way: there is no read-back, and nothing in this
/// crate ever undoes an applied configuration.
pub trait Filter {
    /// Configures SPI write protection for `region` of `device`.
    ///
    /// If `writable` is false, writes to the region from the device's owner
    /// must be blocked.
    fn apply_write_protection(
        &mut self,
        device: Device,
        region: Region,
        writable: bool,
    );

    /// Enables the SMBus commands whose bits are set in `whitelist` for the
    /// rule `rule_id` on relay `bus_id`.
    ///
    /// Both ids are one-based, as they appear in a manifest.
    fn enable_smbus_commands(
        &mut self,
        bus_id: u8,
        rule_id: u8,
        whitelist: &[u8; 32],
    );
}
impl dyn Filter {} // Ensure object-safe.
