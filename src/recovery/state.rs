// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Persistent per-device trust state.
//!
//! Each device's state is one NVM word: the [`TrustState`] flags in the low
//! half, and the number of watchdog recoveries since the last reset of the
//! count in bits 16 to 23. The word is stored inverted, so that erased NVM
//! reads as a device with no flags set.

use enumflags2::bitflags;
use enumflags2::BitFlags;

use crate::hardware::nvm;
use crate::hardware::nvm::Nvm;
use crate::hardware::Device;
use crate::wire::WireEnum as _;

/// Flags describing what the last passes over a device found.
#[bitflags]
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrustState {
    /// The recovery capsule is bad, and could not be replaced; the active
    /// image is good.
    RecoveryFailedAuth = 0b1,
    /// No good image could be found or rebuilt; the device must not boot.
    AllRegionsFailedAuth = 0b10,
    /// A staged capsule is waiting to be promoted to recovery.
    HasPendingRecoveryUpdate = 0b100,
    /// The device's boot watchdog expired.
    RequireWdtRecovery = 0b1000,
    /// The active AFM is good.
    ReadyForAttestation = 0b10000,
    /// The recovery AFM is bad, and could not be replaced.
    AfmRecoveryFailedAuth = 0b1000_0000,
}

impl TrustState {
    /// The flags cleared at the start of every authentication pass.
    pub fn auth_results() -> BitFlags<Self> {
        Self::RecoveryFailedAuth | Self::AllRegionsFailedAuth
    }

    /// The flags cleared at the start of every AFM authentication pass.
    pub fn afm_auth_results() -> BitFlags<Self> {
        Self::ReadyForAttestation | Self::AfmRecoveryFailedAuth
    }
}

const WDT_SHIFT: u32 = 16;

/// The persistent state of one device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// The trust flags.
    pub flags: BitFlags<TrustState>,
    /// Watchdog recoveries performed since the count was last reset.
    pub wdt_recoveries: u8,
}

impl DeviceState {
    fn word(base: u32, device: Device) -> u32 {
        base + device.to_wire_value() as u32
    }

    fn encode(&self) -> u32 {
        !(self.flags.bits() | (self.wdt_recoveries as u32) << WDT_SHIFT)
    }

    /// Loads the state of `device` from the table at word `base`.
    pub fn load(
        nvm: &impl Nvm,
        base: u32,
        device: Device,
    ) -> Result<Self, nvm::Error> {
        let word = !nvm.read_word(Self::word(base, device))?;
        Ok(Self {
            flags: BitFlags::from_bits_truncate(word),
            wdt_recoveries: (word >> WDT_SHIFT) as u8,
        })
    }

    /// Stores this state for `device` in the table at word `base`.
    ///
    /// NVM is not written if the stored state would not change.
    pub fn store(
        &self,
        nvm: &mut impl Nvm,
        base: u32,
        device: Device,
    ) -> Result<(), nvm::Error> {
        let index = Self::word(base, device);
        let word = self.encode();
        if nvm.read_word(index)? == word {
            return Ok(());
        }
        nvm.write_word(index, word)
    }

    /// Returns the watchdog recovery level the next recovery should use, or
    /// `None` once all three levels have been tried.
    pub fn wdt_level(&self) -> Option<u8> {
        match self.wdt_recoveries {
            n @ 0..=2 => Some(n + 1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::fake;
    use pretty_assertions::assert_eq;

    #[test]
    fn erased_is_empty() {
        let nvm = fake::Nvm::new(4);
        let state = DeviceState::load(&nvm, 2, Device::Pch).unwrap();
        assert_eq!(state, DeviceState::default());
        assert_eq!(state.wdt_level(), Some(1));
    }

    #[test]
    fn persistence() {
        let mut nvm = fake::Nvm::new(4);
        let state = DeviceState {
            flags: TrustState::RecoveryFailedAuth
                | TrustState::AfmRecoveryFailedAuth,
            wdt_recoveries: 2,
        };
        state.store(&mut nvm, 2, Device::Pch).unwrap();
        assert_eq!(nvm.words[3], !0x0002_0081);
        assert_eq!(nvm.words[2], !0);

        assert_eq!(DeviceState::load(&nvm, 2, Device::Pch).unwrap(), state);
        assert_eq!(
            DeviceState::load(&nvm, 2, Device::Bmc).unwrap(),
            DeviceState::default()
        );
        assert_eq!(state.wdt_level(), Some(3));

        let exhausted = DeviceState {
            wdt_recoveries: 3,
            ..state
        };
        assert_eq!(exhausted.wdt_level(), None);
    }

    #[test]
    fn unchanged_state_is_not_written() {
        // A single-word NVM that rejects writes: storing the erased state
        // must not try.
        struct ReadOnly(fake::Nvm);
        impl Nvm for ReadOnly {
            fn read_word(&self, index: u32) -> Result<u32, nvm::Error> {
                self.0.read_word(index)
            }
            fn write_word(&mut self, _: u32, _: u32) -> Result<(), nvm::Error> {
                Err(nvm::Error::Unspecified)
            }
        }

        let mut nvm = ReadOnly(fake::Nvm::new(1));
        DeviceState::default()
            .store(&mut nvm, 0, Device::Bmc)
            .unwrap();
        let dirty = DeviceState {
            wdt_recoveries: 1,
            ..Default::default()
        };
        assert!(dirty.store(&mut nvm, 0, Device::Bmc).is_err());
    }
}
